//! Interaction history stored in the `history` table.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::HistoryEntry;

pub const KIND_QUERY: &str = "query";
pub const KIND_AUTOMATION: &str = "automation";

/// Appends one interaction and returns its id.
pub async fn record(pool: &SqlitePool, kind: &str, request: &str, response: &str) -> Result<i64> {
    let now = Utc::now().timestamp();
    let result = sqlx::query(
        "INSERT INTO history (kind, request, response, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(kind)
    .bind(request)
    .bind(response)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent interactions first.
pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        "SELECT id, kind, request, response, created_at FROM history ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| HistoryEntry {
            id: row.get("id"),
            kind: row.get("kind"),
            request: row.get("request"),
            response: row.get("response"),
            created_at: format_ts(row.get("created_at")),
        })
        .collect())
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
