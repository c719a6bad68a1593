//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the pipeline's view of the vector store: an
//! id membership check, an add-only upsert, and nearest-neighbour lookup by cosine
//! similarity. Two backends are provided:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`InMemoryIndex`] | Tests and ephemeral runs |
//! | [`SqliteIndex`] | Durable storage at `[db].path` |
//!
//! Implementations must be `Send + Sync` to be shared across requests.

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexEntry, RawQueryResult};

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The subset of `ids` already stored. Cost is bounded by `ids.len()`,
    /// not by the size of the index.
    async fn contains_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Adds `entries`. Callers only pass ids that are not yet present;
    /// backends leave an already-present id untouched rather than overwrite it.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Up to `k` entries ranked by descending cosine similarity to
    /// `embedding`. An empty index yields an empty result.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<RawQueryResult>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize>;
}
