//! Orchestrator error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::ValidationError;
use thiserror::Error;

/// Errors that can occur while driving a transfer saga.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Caller input violated a transfer invariant.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Another request currently holds the idempotency claim.
    #[error("transfer with this idempotency key is already being processed")]
    DuplicateInFlight,

    /// No transfer with this id.
    #[error("transfer not found")]
    NotFound,

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Outbox error.
    #[error("outbox error: {0}")]
    Outbox(#[from] outbox::OutboxError),

    /// Invariant violation; programmer error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// API-level error that maps saga failures to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Orchestrator(OrchestratorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orchestrator(err) => orchestrator_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn orchestrator_error_to_response(err: OrchestratorError) -> (StatusCode, String) {
    match &err {
        OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrchestratorError::DuplicateInFlight => (StatusCode::CONFLICT, err.to_string()),
        OrchestratorError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
        OrchestratorError::Database(_)
        | OrchestratorError::Outbox(_)
        | OrchestratorError::Internal(_) => {
            tracing::error!(error = %err, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}
