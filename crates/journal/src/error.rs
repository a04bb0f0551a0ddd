//! Journal error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::EntryId;
use domain::ValidationError;
use thiserror::Error;

/// Errors that can occur while posting or voiding entries.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The submitted entry violates a double-entry invariant.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No entry with this id.
    #[error("entry not found: {0}")]
    NotFound(EntryId),

    /// The entry was already voided; voiding is once-only.
    #[error("entry already voided: {0}")]
    AlreadyVoided(EntryId),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Outbox error.
    #[error("outbox error: {0}")]
    Outbox(#[from] outbox::OutboxError),
}

/// Convenience alias for journal results.
pub type Result<T> = std::result::Result<T, JournalError>;

/// API-level error that maps journal failures to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Journal(JournalError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Journal(err) => journal_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn journal_error_to_response(err: JournalError) -> (StatusCode, String) {
    match &err {
        JournalError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        JournalError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        JournalError::AlreadyVoided(_) => (StatusCode::CONFLICT, err.to_string()),
        JournalError::Database(_) | JournalError::Outbox(_) => {
            tracing::error!(error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

impl From<JournalError> for ApiError {
    fn from(err: JournalError) -> Self {
        ApiError::Journal(err)
    }
}
