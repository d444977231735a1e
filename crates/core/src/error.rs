//! Errors raised by the aggregate model itself.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure detected without touching storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, e.g. a blank order number.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An aggregate could not be assembled consistently.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A row is not at the version the caller last saw.
    #[error("stale version token (expected {expected}, stored {actual})")]
    VersionMismatch { expected: u64, actual: u64 },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
