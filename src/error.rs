//! # Error Model
//! One typed error for the whole request path, mapped onto HTTP statuses:
//!
//! - `NotFound` -> 404, `BadRequest` -> 400
//! - `StoreTransient` (connection/timeout) -> 503
//! - `StorePermanent` (schema/syntax) -> 500
//! - `Internal` (invariant violations) -> 500
//!
//! Every non-200 body is `{error, debug?}`; debug carries the relaxation
//! ladder's per-step counts when relevant. Query parameter *values* are never
//! logged, only the failing query's shape/tag.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    StoreTransient,
    StorePermanent,
    Internal,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Optional structured context surfaced to the client (e.g. per-attempt
    /// row counts behind an empty cohort).
    pub debug: Option<serde_json::Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            debug: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreTransient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorePermanent, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_debug(mut self, debug: serde_json::Value) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::StoreTransient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::StorePermanent | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when a retry of an idempotent read may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::StoreTransient
    }
}

/// Classify driver errors: pool/socket trouble is retryable, everything the
/// server actively rejected (schema mismatch, syntax) is permanent.
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match &err {
            E::Database(db) => ApiError::permanent(format!("store rejected query: {}", db)),
            E::ColumnNotFound(col) => {
                ApiError::permanent(format!("store schema mismatch: missing column {col}"))
            }
            E::ColumnDecode { index, .. } => {
                ApiError::permanent(format!("store schema mismatch: column {index} decode"))
            }
            E::TypeNotFound { type_name } => {
                ApiError::permanent(format!("store schema mismatch: unknown type {type_name}"))
            }
            E::Decode(_) | E::Configuration(_) => ApiError::permanent(err.to_string()),
            _ => ApiError::transient(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.message, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self.message, "request rejected");
        }

        let mut body = json!({ "error": self.message });
        if let Some(debug) = self.debug {
            body["debug"] = debug;
        }
        (status, Json(body)).into_response()
    }
}
