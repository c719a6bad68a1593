//! Application service: the query and automation flows.
//!
//! [`RagService`] is what both the CLI and the HTTP server call. It wires a
//! [`RetrievalPipeline`] to a [`Generator`], a [`FileManager`], and the
//! history table.
//!
//! # Query flow
//!
//! 1. Reject a blank query.
//! 2. If a file is named, it must lie under the intake directory or an
//!    automation allow-list entry. Ingest it; its chunks become fallback
//!    context.
//! 3. Embed the query and retrieve the top-k chunks.
//! 4. With no hits, fall back to the named file's first k chunks.
//! 5. Still nothing → [`RagError::NoRelevantDocuments`].
//! 6. Join the context with spaces, generate an answer, record history.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};

use crate::automation::{instruction_prompt, parse_task_instruction, FileManager, TASK_NOT_RECOGNIZED};
use crate::cache::{ContentCache, FsCacheStore};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::PipelineError;
use crate::generation::{build_prompt, create_generator, Generator};
use crate::history::{self, KIND_AUTOMATION, KIND_QUERY};
use crate::index::{SqliteIndex, VectorIndex};
use crate::models::{Chunk, ChunkMetadata, HistoryEntry};
use crate::pipeline::{LoadReport, RetrievalPipeline};
use crate::{db, migrate};

#[derive(Error, Debug)]
pub enum RagError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("no relevant documents found")]
    NoRelevantDocuments,

    #[error("path not allowed: {}", .0.display())]
    PathNotAllowed(PathBuf),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Answer plus the context it was generated from.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub context: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
}

pub struct RagService {
    pipeline: RetrievalPipeline,
    generator: Arc<dyn Generator>,
    files: FileManager,
    pool: SqlitePool,
    top_k: usize,
    /// Directories a query may name a file under.
    readable_roots: Vec<PathBuf>,
}

impl RagService {
    pub fn new(
        pipeline: RetrievalPipeline,
        generator: Arc<dyn Generator>,
        files: FileManager,
        pool: SqlitePool,
        top_k: usize,
    ) -> Self {
        let readable_roots = std::iter::once(pipeline.documents_dir())
            .chain(files.allowed_dirs().iter().map(PathBuf::as_path))
            .map(resolve)
            .collect();
        Self {
            pipeline,
            generator,
            files,
            pool,
            top_k,
            readable_roots,
        }
    }

    pub fn pipeline(&self) -> &RetrievalPipeline {
        &self.pipeline
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn query(
        &self,
        query: &str,
        file_path: Option<&Path>,
    ) -> Result<QueryResponse, RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyQuery);
        }
        info!(query, "processing query");

        let file_chunks: Vec<Chunk> = match file_path {
            Some(path) => {
                self.check_readable(path)?;
                self.pipeline.process_file(path).await?
            }
            None => Vec::new(),
        };

        let embedding = self
            .pipeline
            .embedder()
            .embed_query(query)
            .await
            .map_err(PipelineError::Embedding)?;
        let mut retrieved = self.pipeline.retrieve(&embedding, self.top_k).await?;

        if retrieved.is_empty() && !file_chunks.is_empty() {
            warn!("retrieval returned nothing, using the file's own chunks");
            for chunk in file_chunks.iter().take(self.top_k) {
                retrieved.documents.push(chunk.text.clone());
                retrieved
                    .metadatas
                    .push(ChunkMetadata::new(chunk.file_path.clone(), chunk.source_label.clone()));
            }
        }
        if retrieved.is_empty() {
            return Err(RagError::NoRelevantDocuments);
        }

        let context = retrieved.documents.join(" ");
        let response = self
            .generator
            .generate(&build_prompt(query, &context))
            .await
            .context("generation failed")?;
        info!(chunks = retrieved.len(), "generated response");

        self.remember(KIND_QUERY, query, &response).await;
        Ok(QueryResponse {
            response,
            context: retrieved.documents,
            metadata: retrieved.metadatas,
        })
    }

    /// Turns a natural-language request into a file task and runs it.
    ///
    /// A reply that does not name a known task yields
    /// [`TASK_NOT_RECOGNIZED`] rather than an error.
    pub async fn automate(&self, prompt: &str) -> Result<String, RagError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RagError::EmptyPrompt);
        }

        let reply = self
            .generator
            .generate(&instruction_prompt(prompt))
            .await
            .context("generation failed")?;

        let result = match parse_task_instruction(&reply) {
            Ok(task) => {
                info!(task = task.name(), "executing file task");
                self.files.execute(&task)
            }
            Err(e) => {
                warn!(error = %e, reply = %reply, "could not parse task instruction");
                TASK_NOT_RECOGNIZED.to_string()
            }
        };

        self.remember(KIND_AUTOMATION, prompt, &result).await;
        Ok(result)
    }

    pub async fn history(&self, limit: i64) -> Result<Vec<HistoryEntry>, RagError> {
        Ok(history::recent(&self.pool, limit).await?)
    }

    pub async fn load_documents(&self) -> Result<LoadReport, RagError> {
        Ok(self.pipeline.load_documents().await?)
    }

    /// Loads the intake directory only when the index holds nothing yet.
    pub async fn load_if_empty(&self) -> Result<Option<LoadReport>, RagError> {
        let count = self
            .pipeline
            .index()
            .count()
            .await
            .map_err(PipelineError::Index)?;
        if count > 0 {
            return Ok(None);
        }
        info!("index is empty, loading documents");
        Ok(Some(self.load_documents().await?))
    }

    /// Rejects a path that does not resolve under one of the readable roots.
    /// Symlinks and `..` are resolved first.
    fn check_readable(&self, path: &Path) -> Result<(), RagError> {
        let resolved = resolve(path);
        if self
            .readable_roots
            .iter()
            .any(|root| resolved.starts_with(root))
        {
            Ok(())
        } else {
            warn!(path = %path.display(), "query file outside readable directories");
            Err(RagError::PathNotAllowed(path.to_path_buf()))
        }
    }

    async fn remember(&self, kind: &str, request: &str, response: &str) {
        if let Err(e) = history::record(&self.pool, kind, request, response).await {
            warn!(error = %e, kind, "failed to record history");
        }
    }
}

/// Canonical form of `path`. A missing file resolves through its parent
/// directory so that it still reports as not found rather than not allowed.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Builds the service described by `config`: SQLite pool and schema,
/// on-disk cache, SQLite index, and the configured model providers.
pub async fn build_from_config(config: &Config) -> anyhow::Result<RagService> {
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;

    let store = Arc::new(FsCacheStore::new(&config.cache.dir));
    let cache = ContentCache::new(store, config.cache.key);
    let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(pool.clone()));
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;

    let pipeline = RetrievalPipeline::new(
        cache,
        index,
        embedder,
        config.chunking,
        &config.documents.dir,
    );
    Ok(RagService::new(
        pipeline,
        generator,
        FileManager::new(&config.automation.allowed_dirs),
        pool,
        config.retrieval.top_k,
    ))
}
