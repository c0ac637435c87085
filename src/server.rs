//! HTTP server exposing the retrieval/generation pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Retrieve + generate an answer for a question |
//! | `POST` | `/ingest` | Ingest a single file or a configured connector tree |
//! | `GET`  | `/stats` | Document/chunk/embedding counts |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! and cross-origin tool clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::models::RetrievedItem;
use crate::orchestrator::{Orchestrator, QueryOptions, WebMode};
use crate::stats::{collect_stats, StatsReport};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Starts the HTTP server, binding to `[server].bind` and serving until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let orchestrator = Orchestrator::new(config.clone()).await?;
    let state = AppState { orchestrator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/query", post(handle_query))
        .route("/ingest", post(handle_ingest))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "context harness server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ POST /query ============

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum WebModeRequest {
    Parallel,
    OnLowConfidence,
}

impl From<WebModeRequest> for WebMode {
    fn from(mode: WebModeRequest) -> Self {
        match mode {
            WebModeRequest::Parallel => WebMode::Parallel,
            WebModeRequest::OnLowConfidence => WebMode::OnLowConfidence,
        }
    }
}

fn default_use_cache() -> bool {
    true
}

fn default_web_mode() -> WebModeRequest {
    WebModeRequest::OnLowConfidence
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    top_k: Option<i64>,
    #[serde(default = "default_use_cache")]
    use_cache: bool,
    user_context: Option<String>,
    /// `"ollama"` or `"gemini"`, per the embedding providers that expose a
    /// distinct premium rerank space.
    query_embedder_type: Option<String>,
    #[serde(default)]
    enable_web_search: bool,
    #[serde(default = "default_web_mode")]
    web_mode: WebModeRequest,
}

#[derive(Serialize)]
struct QueryResponseBody {
    answer: Option<String>,
    retrieved: Vec<RetrievedItem>,
    citations: Vec<usize>,
    cache_hit: bool,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponseBody>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let opts = QueryOptions {
        top_k: req.top_k,
        use_cache: req.use_cache,
        enable_web_search: req.enable_web_search,
        web_mode: req.web_mode.into(),
        embedder_type: req.query_embedder_type,
        user_context: req.user_context,
    };

    let result = state
        .orchestrator
        .query(&req.query, opts)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(QueryResponseBody {
        answer: result.answer,
        retrieved: result.retrieved,
        citations: result.citations,
        cache_hit: result.cache_hit,
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Path to a single file to ingest.
    path: Option<PathBuf>,
    /// Name of a configured `[connectors.filesystem.<name>]` instance.
    connector: Option<String>,
    /// Source label recorded for single-file ingestion. Defaults to `"api"`.
    #[serde(default = "default_source")]
    source: String,
    #[serde(default)]
    force: bool,
}

fn default_source() -> String {
    "api".to_string()
}

#[derive(Serialize)]
struct IngestResponseBody {
    document_id: Option<String>,
    chunks_written: usize,
    skipped_unchanged: bool,
    documents_scanned: Option<usize>,
    documents_ingested: Option<usize>,
    documents_skipped: Option<usize>,
    documents_failed: Option<usize>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponseBody>, AppError> {
    match (req.path, req.connector) {
        (Some(path), _) => {
            let outcome = state
                .orchestrator
                .ingest_document(&path, &req.source, req.force)
                .await
                .map_err(|e| internal_error(e.to_string()))?;
            Ok(Json(IngestResponseBody {
                document_id: Some(outcome.document_id),
                chunks_written: outcome.chunks_written,
                skipped_unchanged: outcome.skipped_unchanged,
                documents_scanned: None,
                documents_ingested: None,
                documents_skipped: None,
                documents_failed: None,
            }))
        }
        (None, Some(connector)) => {
            let outcome = state
                .orchestrator
                .ingest_directory(&connector, req.force)
                .await
                .map_err(|e| internal_error(e.to_string()))?;
            Ok(Json(IngestResponseBody {
                document_id: None,
                chunks_written: outcome.chunks_written,
                skipped_unchanged: false,
                documents_scanned: Some(outcome.documents_scanned),
                documents_ingested: Some(outcome.documents_ingested),
                documents_skipped: Some(outcome.documents_skipped),
                documents_failed: Some(outcome.documents_failed),
            }))
        }
        (None, None) => Err(bad_request("either path or connector must be set")),
    }
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsReport>, AppError> {
    let report = collect_stats(state.orchestrator.pool())
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(report))
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
