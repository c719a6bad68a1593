//! Retrieval pipeline orchestration.
//!
//! Coordinates the ingestion flow for one file: extract → chunk → cache →
//! embed (on a cache miss) → diff against the index → upsert new chunks.
//! Also serves similarity queries against the index and bulk-loads an
//! intake directory.
//!
//! The pipeline owns its [`ContentCache`] and mediates every write to the
//! [`VectorIndex`]; both are injected at construction so tests can use
//! in-memory implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cache::ContentCache;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::extract::{is_supported, DocumentFormat};
use crate::index::VectorIndex;
use crate::models::{chunk_id, Chunk, ChunkMetadata, IndexEntry, QueryResult, RawQueryResult};

/// Default number of results for [`RetrievalPipeline::retrieve`].
pub const DEFAULT_TOP_K: usize = 3;

/// What happened while processing one file.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Every chunk of the file, including ones indexed on earlier calls.
    pub chunks: Vec<Chunk>,
    pub cache_hit: bool,
    /// Number of entries added to the index by this call.
    pub indexed: usize,
}

/// Counts from a bulk [`RetrievalPipeline::load_documents`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub processed: usize,
    pub chunks: usize,
    pub indexed: usize,
    /// Files with an unsupported extension.
    pub skipped: usize,
    /// Files whose processing returned an error.
    pub failed: usize,
}

pub struct RetrievalPipeline {
    cache: ContentCache,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    documents_dir: PathBuf,
}

impl RetrievalPipeline {
    pub fn new(
        cache: ContentCache,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        documents_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            index,
            embedder,
            chunking,
            documents_dir: documents_dir.into(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Ingests `path` and returns all of its chunks in extraction order.
    ///
    /// Fails with [`PipelineError::UnsupportedFormat`] or
    /// [`PipelineError::FileNotFound`]; a file with no text yields an empty
    /// list and leaves the index untouched.
    pub async fn process_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        Ok(self.process_file_detailed(path).await?.chunks)
    }

    /// Like [`process_file`](Self::process_file), also reporting cache and
    /// index activity.
    pub async fn process_file_detailed(&self, path: &Path) -> Result<ProcessOutcome> {
        DocumentFormat::from_path(path)?;

        let cached = self
            .cache
            .get_or_compute(path, &self.chunking, self.embedder.as_ref())
            .await?;
        if cached.chunks.is_empty() {
            return Ok(ProcessOutcome::default());
        }

        let file_path = path.to_string_lossy();
        let ids: Vec<String> = (0..cached.chunks.len())
            .map(|i| chunk_id(&file_path, i))
            .collect();
        let existing = self
            .index
            .contains_ids(&ids)
            .await
            .map_err(PipelineError::Index)?;

        // Ids missing from the index, including ones whose cache write
        // succeeded on an earlier call but whose upsert did not.
        let new_entries: Vec<IndexEntry> = cached
            .chunks
            .iter()
            .zip(cached.embeddings.iter())
            .zip(cached.metadatas.iter())
            .zip(ids)
            .map(|(((chunk, embedding), metadata), id)| IndexEntry {
                id,
                embedding: embedding.clone(),
                document: chunk.text.clone(),
                metadata: metadata.clone(),
            })
            .filter(|entry| !existing.contains(&entry.id))
            .collect();

        if !new_entries.is_empty() {
            self.index
                .upsert(&new_entries)
                .await
                .map_err(PipelineError::Index)?;
            info!(path = %file_path, added = new_entries.len(), "indexed new chunks");
        }

        Ok(ProcessOutcome {
            chunks: cached.chunks,
            cache_hit: cached.hit,
            indexed: new_entries.len(),
        })
    }

    /// Top-`k` chunks for `query_embedding`, with metadata normalized so
    /// that `metadatas` has exactly one non-null entry per document.
    pub async fn retrieve(&self, query_embedding: &[f32], k: usize) -> Result<QueryResult> {
        let raw = self
            .index
            .query(query_embedding, k)
            .await
            .map_err(PipelineError::Index)?;
        Ok(normalize_results(raw, k))
    }

    /// Processes every file directly inside the intake directory, creating
    /// the directory if it does not exist. Subdirectories are not entered. Per-file failures are logged and counted; they
    /// never abort the batch.
    pub async fn load_documents(&self) -> Result<LoadReport> {
        let dir = &self.documents_dir;
        let mut report = LoadReport::default();
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            warn!(dir = %dir.display(), "created empty documents directory");
            return Ok(report);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_file() => Some(e.into_path()),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .collect();
        files.sort();

        for path in files {
            if !is_supported(&path) {
                report.skipped += 1;
                continue;
            }
            match self.process_file_detailed(&path).await {
                Ok(outcome) => {
                    report.processed += 1;
                    report.chunks += outcome.chunks.len();
                    report.indexed += outcome.indexed;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %path.display(), error = %e, "failed to process document");
                }
            }
        }

        if report.chunks == 0 {
            warn!(dir = %dir.display(), "no documents found to load");
        } else {
            info!(
                processed = report.processed,
                chunks = report.chunks,
                indexed = report.indexed,
                "loaded documents"
            );
        }
        Ok(report)
    }
}

/// Replaces missing metadata with `unknown` and pads or truncates the
/// metadata list to the document count.
fn normalize_results(raw: RawQueryResult, k: usize) -> QueryResult {
    let mut documents = raw.documents;
    documents.truncate(k);
    let metadatas = raw
        .metadatas
        .into_iter()
        .map(|m| m.unwrap_or_else(ChunkMetadata::unknown))
        .chain(std::iter::repeat_with(ChunkMetadata::unknown))
        .take(documents.len())
        .collect();
    QueryResult {
        documents,
        metadatas,
    }
}
