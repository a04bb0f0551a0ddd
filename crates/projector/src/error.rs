//! Projector error types.

use thiserror::Error;

/// Errors that can occur while folding events into the read model.
#[derive(Debug, Error)]
pub enum ProjectorError {
    /// An event payload could not be decoded. Without a dead-letter sink
    /// this is a poison message: the consumer pauses and retries.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A payload field failed validation (bad UUID, unspecified side).
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Kafka consumer error.
    #[error("consumer error: {0}")]
    Consumer(String),
}

/// Convenience alias for projector results.
pub type Result<T> = std::result::Result<T, ProjectorError>;
