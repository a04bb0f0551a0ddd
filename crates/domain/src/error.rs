//! Domain error types.

use thiserror::Error;

/// A field-level validation failure, surfaced to callers as a 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// The offending field, in wire-format naming.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A business invariant was violated by caller input.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A state transition was requested that the lifecycle forbids.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}
