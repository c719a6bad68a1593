//! Content-addressed cache of per-file chunking and embedding results.
//!
//! Each source file maps to one [`CacheRecord`] holding the SHA-256 of the
//! file's bytes plus the chunks, embeddings, and metadata derived from it.
//! When a file is processed again with the same hash, the record is reused
//! and no extraction or embedding work happens.
//!
//! Caching is an optimization only. Unreadable or malformed records are
//! logged and treated as a miss; failed writes are logged and ignored.
//!
//! Records are persisted through a [`CacheStore`]: [`FsCacheStore`] writes one
//! JSON file per source file, [`MemoryCacheStore`] keeps them in a map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::chunk_extraction;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{PipelineError, Result};
use crate::extract::{extract_bytes, DocumentFormat};
use crate::models::{Chunk, ChunkMetadata};

/// How a source path is turned into a cache record name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    /// The file's base name. Same-named files in different directories share
    /// one record and evict each other.
    #[default]
    FileName,
    /// SHA-256 of the absolute path.
    PathHash,
}

impl CacheKey {
    pub fn key_for(&self, path: &Path) -> String {
        match self {
            CacheKey::FileName => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| hash_bytes(path.to_string_lossy().as_bytes())),
            CacheKey::PathHash => {
                let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
                hash_bytes(absolute.to_string_lossy().as_bytes())
            }
        }
    }
}

/// Hex SHA-256 digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Memoized derivation of one source file.
///
/// `chunks`, `embeddings`, and `metadatas` always have the same length;
/// [`CacheRecord::new`] refuses to build a record otherwise, and a record
/// read back from storage is re-checked before use.
///
/// Serialized as a 4-element array `[file_hash, chunks, embeddings, metadatas]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordRepr", into = "RecordRepr")]
pub struct CacheRecord {
    file_hash: String,
    chunks: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    metadatas: Vec<ChunkMetadata>,
}

#[derive(Serialize, Deserialize)]
struct RecordRepr(String, Vec<String>, Vec<Vec<f32>>, Vec<ChunkMetadata>);

impl From<RecordRepr> for CacheRecord {
    fn from(r: RecordRepr) -> Self {
        Self {
            file_hash: r.0,
            chunks: r.1,
            embeddings: r.2,
            metadatas: r.3,
        }
    }
}

impl From<CacheRecord> for RecordRepr {
    fn from(r: CacheRecord) -> Self {
        RecordRepr(r.file_hash, r.chunks, r.embeddings, r.metadatas)
    }
}

impl CacheRecord {
    /// Builds a record, or returns `None` if the three sequences differ in length.
    pub fn new(
        file_hash: String,
        chunks: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Option<Self> {
        let record = Self {
            file_hash,
            chunks,
            embeddings,
            metadatas,
        };
        record.is_aligned().then_some(record)
    }

    pub fn is_aligned(&self) -> bool {
        self.chunks.len() == self.embeddings.len() && self.chunks.len() == self.metadatas.len()
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    pub fn metadatas(&self) -> &[ChunkMetadata] {
        &self.metadatas
    }
}

/// Chunks for one file together with their embeddings and metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedChunks {
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
    pub metadatas: Vec<ChunkMetadata>,
    /// True when the result came from a matching cache record.
    pub hit: bool,
}

impl CachedChunks {
    /// A record may have been written for another file with the same key and
    /// identical bytes, so `file` is taken from `file_path`, not the record.
    fn from_record(record: CacheRecord, file_path: &str) -> Self {
        let metadatas: Vec<ChunkMetadata> = record
            .metadatas
            .into_iter()
            .map(|meta| ChunkMetadata::new(file_path, meta.source))
            .collect();
        let chunks = record
            .chunks
            .into_iter()
            .zip(metadatas.iter())
            .map(|(text, meta)| Chunk {
                text,
                source_label: meta.source.clone(),
                file_path: file_path.to_string(),
            })
            .collect();
        Self {
            chunks,
            embeddings: record.embeddings,
            metadatas,
            hit: true,
        }
    }
}

/// Raw byte storage for serialized cache records, addressed by key.
pub trait CacheStore: Send + Sync {
    fn read(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
    fn write(&self, key: &str, bytes: &[u8]) -> std::io::Result<()>;
}

/// One `<key>.json` file per record under a cache directory.
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl CacheStore for FsCacheStore {
    fn read(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.record_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &target).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })
    }
}

/// In-memory record storage for tests.
#[derive(Default)]
pub struct MemoryCacheStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        let records = self
            .records
            .read()
            .map_err(|_| std::io::Error::other("cache lock poisoned"))?;
        Ok(records.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| std::io::Error::other("cache lock poisoned"))?;
        records.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Per-file cache in front of extraction, chunking, and embedding.
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
    key: CacheKey,
}

impl ContentCache {
    pub fn new(store: Arc<dyn CacheStore>, key: CacheKey) -> Self {
        Self { store, key }
    }

    /// Reads the record for `path`. Missing, unreadable, malformed, and
    /// misaligned records all come back as `None`.
    pub fn load(&self, path: &Path) -> Option<CacheRecord> {
        let key = self.key.key_for(path);
        let bytes = match self.store.read(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache record unreadable, recomputing");
                return None;
            }
        };
        match serde_json::from_slice::<CacheRecord>(&bytes) {
            Ok(record) if record.is_aligned() => Some(record),
            Ok(_) => {
                warn!(path = %path.display(), "corrupt cache record (misaligned lengths), recomputing");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache record, recomputing");
                None
            }
        }
    }

    /// Persists `record` as the record for `path`, replacing any previous one.
    /// Failures are logged, not returned.
    pub fn save(&self, path: &Path, record: &CacheRecord) {
        let key = self.key.key_for(path);
        let result = serde_json::to_vec(record)
            .map_err(std::io::Error::other)
            .and_then(|bytes| self.store.write(&key, &bytes));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write cache record");
        }
    }

    /// Returns the chunks for `path`, computing and caching them on a miss.
    ///
    /// On a hit (stored hash equals the current hash) the cached chunks,
    /// embeddings, and metadata are returned without extraction or embedding.
    /// On a miss the file is extracted and chunked, the whole batch is
    /// embedded with one call, and the new record replaces the old one.
    /// A file with no extractable text yields an empty result and leaves the
    /// cache untouched.
    pub async fn get_or_compute(
        &self,
        path: &Path,
        chunking: &ChunkingConfig,
        embedder: &dyn Embedder,
    ) -> Result<CachedChunks> {
        let format = DocumentFormat::from_path(path)?;
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let file_hash = hash_bytes(&bytes);
        let file_path = path.to_string_lossy().into_owned();

        if let Some(record) = self.load(path) {
            if record.file_hash == file_hash {
                debug!(path = %file_path, chunks = record.chunks.len(), "cache hit");
                return Ok(CachedChunks::from_record(record, &file_path));
            }
            debug!(path = %file_path, "file changed since cached, recomputing");
        }

        let extraction = extract_bytes(&bytes, format)?;
        let chunks = chunk_extraction(&extraction, &file_path, chunking);
        if chunks.is_empty() {
            warn!(path = %file_path, "no extractable text, skipping");
            return Ok(CachedChunks::default());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder
            .embed_documents(&texts)
            .await
            .map_err(PipelineError::Embedding)?;
        let metadatas: Vec<ChunkMetadata> = chunks
            .iter()
            .map(|c| ChunkMetadata::new(file_path.clone(), c.source_label.clone()))
            .collect();

        let record = CacheRecord::new(file_hash, texts, embeddings, metadatas).ok_or_else(|| {
            PipelineError::Embedding(anyhow::anyhow!(
                "embedder returned a different number of vectors than chunks for {}",
                file_path
            ))
        })?;
        self.save(path, &record);
        info!(path = %file_path, chunks = chunks.len(), "computed and cached chunks");

        Ok(CachedChunks {
            chunks,
            embeddings: record.embeddings,
            metadatas: record.metadatas,
            hit: false,
        })
    }
}
