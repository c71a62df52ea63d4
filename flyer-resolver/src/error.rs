//! Error types for flyer-resolver
//!
//! `ApiError` is the single error type returned by HTTP handlers. Domain
//! errors convert into it so handlers can use `?` throughout.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::RunError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. project already processing
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// flyer-common error
    #[error("Common error: {0}")]
    Common(flyer_common::Error),
}

impl From<flyer_common::Error> for ApiError {
    fn from(err: flyer_common::Error) -> Self {
        match err {
            flyer_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            flyer_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            flyer_common::Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RunError::PreconditionFailed(_) => ApiError::Conflict(err.to_string()),
            RunError::NoProducts(_) => ApiError::BadRequest(err.to_string()),
            RunError::Common(inner) => inner.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
