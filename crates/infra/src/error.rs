//! Error taxonomy surfaced by the repository and unit of work.

use thiserror::Error;

use crate::store::StoreError;
use crate::tracking::TrackingConflict;

/// Failure of a reconcile, commit or read.
///
/// - `NotFound` and `Conflict` raised during reconciliation are detected before
///   any backend call and leave the session untouched.
/// - `Conflict` is also reported for uniqueness and stale-version failures at
///   commit; the batch is rolled back.
/// - `Persistence` is any other backend failure; the batch is rolled back.
///
/// Nothing is retried implicitly: a retry needs a freshly fetched snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl RepositoryError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl From<TrackingConflict> for RepositoryError {
    fn from(value: TrackingConflict) -> Self {
        RepositoryError::Conflict(value.to_string())
    }
}

impl From<StoreError> for RepositoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) | StoreError::UniqueViolation(msg) => {
                RepositoryError::Conflict(msg)
            }
            StoreError::ForeignKeyViolation(msg) | StoreError::Backend(msg) => {
                RepositoryError::Persistence(msg)
            }
        }
    }
}
