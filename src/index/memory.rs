//! In-memory [`VectorIndex`] for tests and ephemeral runs.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{IndexEntry, RawQueryResult};

use super::VectorIndex;

#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored entries in insertion order.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn contains_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .filter(|e| ids.contains(&e.id))
            .map(|e| e.id.clone())
            .collect())
    }

    async fn upsert(&self, new_entries: &[IndexEntry]) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let mut ids: HashSet<String> = entries.iter().map(|e| e.id.clone()).collect();
        for entry in new_entries {
            if ids.insert(entry.id.clone()) {
                entries.push(entry.clone());
            }
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<RawQueryResult> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut scored: Vec<(f32, &IndexEntry)> = entries
            .iter()
            .map(|e| (cosine_similarity(embedding, &e.embedding), e))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(RawQueryResult {
            documents: scored.iter().map(|(_, e)| e.document.clone()).collect(),
            metadatas: scored.iter().map(|(_, e)| Some(e.metadata.clone())).collect(),
        })
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}
