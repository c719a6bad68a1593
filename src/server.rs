//! HTTP API over [`RagService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/rag/query` | Answer a question from indexed documents |
//! | `POST` | `/rag/automate` | Run a natural-language file task |
//! | `GET`  | `/rag/history` | Recent interactions, newest first |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_format` (400),
//! `forbidden` (403), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser UI can
//! call the API from another port.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::HistoryEntry;
use crate::service::{build_from_config, QueryResponse, RagError, RagService};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Starts the HTTP server on `[server].bind`.
///
/// If the index is empty, the intake directory is loaded before the
/// listener opens. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(build_from_config(config).await?);
    if let Some(report) = service.load_if_empty().await? {
        info!(
            processed = report.processed,
            chunks = report.chunks,
            failed = report.failed,
            "startup load complete"
        );
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "RAG server listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// Routes and CORS layer, without binding a listener.
pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/rag/query", post(handle_query))
        .route("/rag/automate", post(handle_automate))
        .route("/rag/history", get(handle_history))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(service)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::EmptyQuery | RagError::EmptyPrompt => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            RagError::NoRelevantDocuments => (StatusCode::NOT_FOUND, "not_found"),
            RagError::PathNotAllowed(_) => (StatusCode::FORBIDDEN, "forbidden"),
            RagError::Pipeline(PipelineError::UnsupportedFormat(_)) => {
                (StatusCode::BAD_REQUEST, "unsupported_format")
            }
            RagError::Pipeline(PipelineError::FileNotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            RagError::Pipeline(_) | RagError::Other(_) => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /rag/query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    file_path: Option<PathBuf>,
}

async fn handle_query(
    State(service): State<Arc<RagService>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let response = service.query(&req.query, req.file_path.as_deref()).await?;
    Ok(Json(response))
}

// ============ POST /rag/automate ============

#[derive(Deserialize)]
struct AutomationRequest {
    prompt: String,
}

#[derive(Serialize)]
struct AutomationResponse {
    result: String,
}

async fn handle_automate(
    State(service): State<Arc<RagService>>,
    Json(req): Json<AutomationRequest>,
) -> Result<Json<AutomationResponse>, AppError> {
    let result = service.automate(&req.prompt).await?;
    Ok(Json(AutomationResponse { result }))
}

// ============ GET /rag/history ============

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryEntry>,
}

async fn handle_history(
    State(service): State<Arc<RagService>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let history = service.history(limit).await?;
    Ok(Json(HistoryResponse { history }))
}
