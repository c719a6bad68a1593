//! # doc-rag
//!
//! Retrieval-augmented generation over a local document collection.
//!
//! Files are extracted (plain text, PDF per page, DOCX per paragraph),
//! split into overlapping chunks, embedded, and stored in a deduplicating
//! vector index. Per-file results are cached by content hash so unchanged
//! files are never re-embedded. Queries retrieve the nearest chunks and
//! hand them to a language model as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌────────────┐   ┌─────────────┐
//! │ Extract  │──▶│  Chunk  │──▶│   Cache    │──▶│ VectorIndex │
//! │ txt/pdf/ │   │ recurs. │   │ sha256 key │   │ dedup by id │
//! │ docx     │   │ splitter│   │ + embed    │   │             │
//! └──────────┘   └─────────┘   └────────────┘   └──────┬──────┘
//!                                                      │
//!                           ┌──────────────────────────┤
//!                           ▼                          ▼
//!                      ┌──────────┐              ┌──────────┐
//!                      │   CLI    │              │   HTTP   │
//!                      │  (rag)   │              │  (axum)  │
//!                      └──────────┘              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error type |
//! | [`extract`] | Text extraction per file format |
//! | [`chunk`] | Recursive character chunking |
//! | [`cache`] | Content-hash cache of chunks and embeddings |
//! | [`index`] | Vector index trait, in-memory and SQLite backends |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Answer generation |
//! | [`pipeline`] | Ingestion and retrieval orchestration |
//! | [`automation`] | Natural-language file tasks |
//! | [`history`] | Interaction log |
//! | [`service`] | Query and automation flows |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |

pub mod automation;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod history;
pub mod index;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod service;
