//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the chunks, index entries, and query results that
//! flow between the extractor, the content cache, and the vector index.

use serde::{Deserialize, Serialize};

/// Label used when a chunk's provenance cannot be determined.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A bounded span of text plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Where in the source file the chunk came from (`page_3`, `paragraph_12`, ...).
    pub source_label: String,
    pub file_path: String,
}

/// Metadata stored alongside every indexed chunk.
///
/// Serialized as `{"file": ..., "source": ...}` both in cache records and
/// in the index's metadata column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file: String,
    pub source: String,
}

impl ChunkMetadata {
    pub fn new(file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            source: source.into(),
        }
    }

    /// Placeholder metadata substituted for missing or malformed entries.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_LABEL, UNKNOWN_LABEL)
    }
}

/// A unit stored in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: ChunkMetadata,
}

/// Deterministic index id for the `index`-th chunk of `file_path`.
///
/// Re-processing an unchanged file yields the same ids, which is what makes
/// indexing idempotent.
pub fn chunk_id(file_path: &str, index: usize) -> String {
    format!("{}_chunk_{}", file_path, index)
}

/// Nearest-neighbour results as returned by a [`VectorIndex`](crate::index::VectorIndex).
///
/// Metadata entries are optional here because a backend may hold rows whose
/// metadata is absent or unreadable. The pipeline normalizes this into a
/// [`QueryResult`] before anything reaches a caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQueryResult {
    pub documents: Vec<String>,
    pub metadatas: Vec<Option<ChunkMetadata>>,
}

/// Ranked retrieval results: `documents[i]` is described by `metadatas[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub documents: Vec<String>,
    pub metadatas: Vec<ChunkMetadata>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

/// A recorded interaction (query or automation request).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    /// `"query"` or `"automation"`.
    pub kind: String,
    pub request: String,
    pub response: String,
    pub created_at: String,
}
