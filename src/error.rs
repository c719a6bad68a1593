//! Error types for the ingestion and retrieval pipeline.
//!
//! Structural failures (unsupported format, missing file) and backend
//! failures (embedding, index) surface as [`PipelineError`]. Recoverable
//! conditions such as a corrupt cache record or an empty extraction are
//! absorbed where they occur and never reach this type.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// File extension outside the supported set.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// PDF or DOCX content could not be parsed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Embedding(anyhow::Error),

    #[error("vector index unavailable: {0}")]
    Index(anyhow::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
