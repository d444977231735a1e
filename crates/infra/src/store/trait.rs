use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use ordertrack_core::{OrderId, OrderTimeId};
use ordertrack_orders::InternalOrder;

use crate::tracking::StagedEntry;

/// Storage operation error.
///
/// These are **infrastructure errors** reported by a backend; the repository
/// maps them onto [`crate::RepositoryError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Stale version token, or the row to update/delete is gone.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Primary key clash, or a second live time for one order.
    #[error("uniqueness violation: {0}")]
    UniqueViolation(String),

    /// A time without a live owning order, or an order deleted while a time
    /// still references it.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Anything else (IO, decoding, pool failures).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub affected_rows: u64,
    /// New version token of every inserted or updated row, in batch order.
    pub versions: Vec<(Uuid, u64)>,
}

/// Order aggregate storage.
///
/// ## Implementation Requirements
///
/// - `fetch` returns the root with its time (if any) and never touches any
///   session's tracking state
/// - `apply_batch` applies entries in the given order and is atomic: either
///   every entry is applied or none is
/// - updates and deletes are checked against the entry's version token
/// - a time must reference a live order, and an order has at most one time
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn fetch(&self, id: OrderId) -> Result<Option<InternalOrder>, StoreError>;

    async fn exists(&self, id: OrderId) -> Result<bool, StoreError>;

    /// Every stored order, in insertion order.
    async fn list(&self) -> Result<Vec<InternalOrder>, StoreError>;

    async fn order_time_exists(&self, id: OrderTimeId) -> Result<bool, StoreError>;

    async fn apply_batch(&self, batch: Vec<StagedEntry>) -> Result<BatchOutcome, StoreError>;
}

#[async_trait]
impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn fetch(&self, id: OrderId) -> Result<Option<InternalOrder>, StoreError> {
        (**self).fetch(id).await
    }

    async fn exists(&self, id: OrderId) -> Result<bool, StoreError> {
        (**self).exists(id).await
    }

    async fn list(&self) -> Result<Vec<InternalOrder>, StoreError> {
        (**self).list().await
    }

    async fn order_time_exists(&self, id: OrderTimeId) -> Result<bool, StoreError> {
        (**self).order_time_exists(id).await
    }

    async fn apply_batch(&self, batch: Vec<StagedEntry>) -> Result<BatchOutcome, StoreError> {
        (**self).apply_batch(batch).await
    }
}
