/// Unified error types for the Tapglue backend
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv::StoreError;

/// Main error type for the backend
#[derive(Error, Debug)]
pub enum TapglueError {
    /// Malformed JSON, invalid field values, id mismatches, oversized payloads
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid signature, session mismatch, bad credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Session belongs to a different principal than the targeted resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Primary key absent
    #[error("not found: {0}")]
    NotFound(String),

    /// SETNX collision on create
    #[error("already exists: {0}")]
    Conflict(String),

    /// Quota exhausted for the current window
    #[error("rate limit exceeded")]
    RateLimited { reset_at: DateTime<Utc> },

    /// A stored record could not be decoded
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Key/value store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server errors, including partial index writes
    #[error("internal error: {0}")]
    Internal(String),
}

/// Single entry of the error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: u16,
    pub message: String,
}

/// Error envelope written on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorEntry>,
}

impl TapglueError {
    /// HTTP status for this error kind
    pub fn status(&self) -> StatusCode {
        match self {
            TapglueError::BadRequest(_) | TapglueError::Conflict(_) => StatusCode::BAD_REQUEST,
            TapglueError::Unauthorized(_) | TapglueError::Forbidden(_) => StatusCode::UNAUTHORIZED,
            TapglueError::NotFound(_) => StatusCode::NOT_FOUND,
            TapglueError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            TapglueError::Corrupt { .. } | TapglueError::Store(_) | TapglueError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to put on the wire
    pub fn public_message(&self) -> String {
        match self {
            TapglueError::BadRequest(msg)
            | TapglueError::Unauthorized(msg)
            | TapglueError::Forbidden(msg)
            | TapglueError::NotFound(msg) => msg.clone(),
            TapglueError::Conflict(msg) => format!("{} already exists", msg),
            TapglueError::RateLimited { .. } => "rate limit exceeded".to_string(),
            // Don't leak details
            TapglueError::Corrupt { .. } | TapglueError::Store(_) | TapglueError::Internal(_) => {
                "internal server error".to_string()
            }
        }
    }

    /// Whether the internal cause should go to the error log channel
    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }

    /// Mutations that require the record to pre-exist report a missing record as internal
    pub fn for_mutation(self) -> Self {
        match self {
            TapglueError::NotFound(msg) => TapglueError::Internal(format!("mutation target missing: {}", msg)),
            other => other,
        }
    }

    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.status().as_u16(),
            message: self.public_message(),
        }
    }
}

/// Render a list of errors as one response; the status is that of the first error
pub fn errors_response(errors: &[TapglueError]) -> Response {
    let status = errors
        .first()
        .map(|e| e.status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = Json(ErrorResponse {
        errors: errors.iter().map(TapglueError::entry).collect(),
    });

    let mut response = (status, body).into_response();
    if let Some(TapglueError::RateLimited { reset_at }) = errors.first() {
        if let Ok(value) = HeaderValue::from_str(&reset_at.timestamp().to_string()) {
            response.headers_mut().insert("X-RateLimit-Reset", value);
        }
    }
    response
}

/// Convert TapglueError to HTTP response
impl IntoResponse for TapglueError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            tracing::error!(target: "tapglue::errors", error = %self, "request failed");
        }
        errors_response(std::slice::from_ref(&self))
    }
}

/// Result type alias for backend operations
pub type TapglueResult<T> = Result<T, TapglueError>;

/// Errors accumulated over one request and emitted together
#[derive(Debug, Default)]
pub struct ErrorList(pub Vec<TapglueError>);

impl ErrorList {
    pub fn push(&mut self, error: TapglueError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<TapglueError> for ErrorList {
    fn from(error: TapglueError) -> Self {
        Self(vec![error])
    }
}

impl IntoResponse for ErrorList {
    fn into_response(self) -> Response {
        for error in self.0.iter().filter(|e| e.is_internal()) {
            tracing::error!(target: "tapglue::errors", error = %error, "request failed");
        }
        if self.0.is_empty() {
            return errors_response(&[TapglueError::Internal("empty error list".to_string())]);
        }
        errors_response(&self.0)
    }
}

/// Result of a request handler
pub type ApiResult<T> = Result<T, ErrorList>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(TapglueError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(TapglueError::Conflict("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(TapglueError::Forbidden("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(TapglueError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            TapglueError::RateLimited { reset_at: Utc::now() }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            TapglueError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_cause_not_exposed() {
        let err = TapglueError::Internal("redis connection reset by peer".into());
        assert_eq!(err.public_message(), "internal server error");
        assert!(err.to_string().contains("redis connection reset"));
    }

    #[test]
    fn test_conflict_message() {
        let err = TapglueError::Conflict("connection".into());
        assert_eq!(err.public_message(), "connection already exists");
    }

    #[test]
    fn test_error_list_uses_first_status() {
        let list = ErrorList(vec![
            TapglueError::BadRequest("user name must be between 2 and 40 characters".into()),
            TapglueError::BadRequest("user email is not valid".into()),
        ]);
        let response = list.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_sets_reset_header() {
        let response = TapglueError::RateLimited { reset_at: Utc::now() }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("X-RateLimit-Reset"));
    }

    #[test]
    fn test_not_found_for_mutation() {
        let err = TapglueError::NotFound("user".into()).for_mutation();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = TapglueError::BadRequest("nope".into()).for_mutation();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
