use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::narrate::NarrationError;

/// Failure reported by a data collaborator (track store, feature provider, token endpoint).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The access credential was rejected.
    #[error("authentication expired")]
    AuthExpired,

    /// Upstream asked us to slow down. `retry_after` is the server-supplied delay, if any.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Anything else: transport error, 5xx, malformed body.
    #[error("upstream fetch failed: {0}")]
    Upstream(String),
}

/// Failure of a whole analysis run. No partial era list accompanies any of these.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("authentication expired, re-authentication required")]
    AuthExpired,

    #[error("upstream fetch failed: {0}")]
    Upstream(String),

    #[error("clustering failed: {0}")]
    Clustering(String),

    /// The policy cannot work with the configured feature source.
    #[error("unsupported analysis: {0}")]
    Unsupported(String),
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::AuthExpired => PipelineError::AuthExpired,
            FetchError::RateLimited { .. } => {
                PipelineError::Upstream("rate limit retries exhausted".into())
            }
            FetchError::Upstream(msg) => PipelineError::Upstream(msg),
        }
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Upstream(String),
    BadRequest(String),
    Internal(String),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AuthExpired => AppError::Unauthorized(err.to_string()),
            PipelineError::Upstream(_) => AppError::Upstream(err.to_string()),
            PipelineError::Clustering(_) => AppError::Internal(err.to_string()),
            PipelineError::Unsupported(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<NarrationError> for AppError {
    fn from(err: NarrationError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (
            status,
            Json(json!({ "error": message })),
        )
            .into_response()
    }
}
