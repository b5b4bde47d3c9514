//! Error types for the HALO admission service.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for halo-gate operations.
#[derive(Error, Debug)]
pub enum HaloError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for halo-gate operations.
pub type Result<T> = std::result::Result<T, HaloError>;

/// Failures of the counter store itself.
///
/// These are never rate-limit decisions: an exceeded limit is reported as
/// [`ConsumeOutcome::Exceeded`](crate::ratelimit::ConsumeOutcome), not as an error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store rejected the command or the connection failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backing store did not answer in time.
    #[error("store command timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// JSON error envelope shared by every HTTP error response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorDetail,
}

/// Body of the `error` field in [`ErrorEnvelope`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub message: String,
    pub code: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                message: message.to_string(),
                code: code.to_string(),
                status: status.as_u16(),
                retry_after: None,
            },
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.error.retry_after = Some(secs);
        self
    }
}

/// Generic application error rendered through the shared JSON envelope.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTHENTICATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl From<StoreError> for ApiError {
    /// The limiter logs the failure; the body carries no store details.
    fn from(_err: StoreError) -> Self {
        ApiError::service_unavailable("Rate limiting is temporarily unavailable")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope::new(self.status, self.code, &self.message);
        (self.status, Json(body)).into_response()
    }
}
