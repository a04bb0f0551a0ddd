//! Outbox error types.

use thiserror::Error;

/// Errors that can occur while draining or publishing outbox records.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Database error while claiming or marking records.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The bus rejected or never acknowledged a publish.
    #[error("publish error: {0}")]
    Publish(String),

    /// Stored headers could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for outbox results.
pub type Result<T> = std::result::Result<T, OutboxError>;
