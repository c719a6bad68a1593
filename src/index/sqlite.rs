//! SQLite-backed [`VectorIndex`].
//!
//! Stores each entry as one row of `index_entries` with the embedding as a
//! little-endian f32 BLOB and metadata as JSON text. Similarity search is a
//! brute-force cosine scan in Rust, which is adequate for a single local
//! collection.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkMetadata, IndexEntry, RawQueryResult};

use super::VectorIndex;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Wraps a pool whose schema has already been created by
    /// [`ensure_schema`](crate::migrate::ensure_schema).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn contains_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        for id in ids {
            let hit: Option<String> =
                sqlx::query_scalar("SELECT id FROM index_entries WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            found.extend(hit);
        }
        Ok(found)
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO index_entries (id, document, metadata_json, embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.document)
            .bind(serde_json::to_string(&entry.metadata)?)
            .bind(vec_to_blob(&entry.embedding))
            .bind(entry.embedding.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<RawQueryResult> {
        let rows = sqlx::query("SELECT id, document, metadata_json, embedding FROM index_entries")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(f32, String, Option<ChunkMetadata>)> = rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: Option<String> = row.get("metadata_json");
                let metadata = metadata_json.and_then(|json| {
                    serde_json::from_str::<ChunkMetadata>(&json)
                        .inspect_err(|e| warn!(id = %id, error = %e, "unreadable index metadata"))
                        .ok()
                });
                let score = cosine_similarity(embedding, &blob_to_vec(&blob));
                (score, row.get::<String, _>("document"), metadata)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut result = RawQueryResult::default();
        for (_, document, metadata) in scored {
            result.documents.push(document);
            result.metadatas.push(metadata);
        }
        Ok(result)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
