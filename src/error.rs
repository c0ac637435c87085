//! Closed error taxonomy for the retrieval/ingestion core.
//!
//! Component boundaries (Extractor, Embedder, VectorIndex, KeywordIndex,
//! WebProvider, WebKB, SemanticCache, Generator, Orchestrator) report failures
//! as values of this enum rather than raw `anyhow::Error`, so callers can match
//! on kind and apply the degrade-and-continue policy described in the crate's
//! design notes. CLI/HTTP boundaries still use `anyhow::Result` to collect
//! context on the way out, converting into this enum only where a caller needs
//! to branch on failure kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("input error: {0}")]
    Input(String),

    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("backend transient failure ({backend}): {reason}")]
    BackendTransient { backend: String, reason: String },

    #[error("cache permanently unavailable: {0}")]
    CachePermanent(String),

    #[error("premium embedder failure ({backend}): {reason}")]
    PremiumEmbedderFailure { backend: String, reason: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("web fetch failed for {url}: {reason}")]
    WebFetchFailed { url: String, reason: String },
}

impl CoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::BackendTransient { .. } | CoreError::RateLimited(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Input(_) | CoreError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            CoreError::ExtractionFailed { .. }
            | CoreError::BackendTransient { .. }
            | CoreError::CachePermanent(_)
            | CoreError::PremiumEmbedderFailure { .. }
            | CoreError::WebFetchFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            CoreError::Input(_) => "bad_request",
            CoreError::UnsupportedFormat(_) => "unsupported_format",
            CoreError::RateLimited(_) => "rate_limited",
            CoreError::ExtractionFailed { .. } => "extraction_failed",
            CoreError::BackendTransient { .. } => "backend_transient",
            CoreError::CachePermanent(_) => "cache_unavailable",
            CoreError::PremiumEmbedderFailure { .. } => "premium_embedder_failure",
            CoreError::WebFetchFailed { .. } => "web_fetch_failed",
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (status, Json(body)).into_response()
    }
}
