//! Order repository: the single entry point callers use to persist and read
//! order aggregates.
//!
//! A repository owns one [`UnitOfWork`] session. `upsert` is the one-shot
//! path (fetch snapshot, reconcile, commit); `update` + `save` split staging
//! from committing so several aggregates can share one batch.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::instrument;

use ordertrack_core::{OrderId, OrderTimeId};
use ordertrack_orders::InternalOrder;

use crate::error::RepositoryError;
use crate::reconcile::{Presence, reconcile};
use crate::store::OrderStore;
use crate::tracking::{StagedEntry, TrackingTable};
use crate::unit_of_work::{CommitSummary, UnitOfWork};

/// Monotonic counter for human-facing order numbers.
///
/// In-memory only: values are unique within a process and restart at the
/// initial value on every launch.
#[derive(Debug)]
pub struct OrderNumberSequence {
    next: AtomicU64,
}

static PROCESS_SEQUENCE: OrderNumberSequence = OrderNumberSequence::starting_at(1);

impl OrderNumberSequence {
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// The sequence shared by every repository in this process.
    pub fn process() -> &'static OrderNumberSequence {
        &PROCESS_SEQUENCE
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct OrderRepository<S> {
    unit_of_work: UnitOfWork<S>,
}

impl<S> OrderRepository<S>
where
    S: OrderStore,
{
    pub fn new(store: S) -> Self {
        Self {
            unit_of_work: UnitOfWork::new(store),
        }
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<S> {
        &self.unit_of_work
    }

    pub fn tracking(&self) -> &TrackingTable {
        self.unit_of_work.tracking()
    }

    /// Create or update `order` in one commit.
    ///
    /// On success the committed version tokens are written back into `order`,
    /// so it can be upserted again without refetching. Returns the number of
    /// affected rows.
    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    pub async fn upsert(&mut self, order: &mut InternalOrder) -> Result<u64, RepositoryError> {
        self.update(order).await?;
        let summary = self.save().await?;
        summary.apply_to(order);
        Ok(summary.affected_rows)
    }

    /// Stage the changes that bring storage in line with `order`.
    ///
    /// Nothing is written until [`OrderRepository::save`].
    pub async fn update(
        &mut self,
        order: &InternalOrder,
    ) -> Result<Vec<StagedEntry>, RepositoryError> {
        self.stage(order, Presence::Any).await
    }

    /// Like [`OrderRepository::update`], but the order must already exist.
    pub async fn update_existing(
        &mut self,
        order: &InternalOrder,
    ) -> Result<Vec<StagedEntry>, RepositoryError> {
        self.stage(order, Presence::MustExist).await
    }

    /// Commit everything staged in this session.
    pub async fn save(&mut self) -> Result<CommitSummary, RepositoryError> {
        self.unit_of_work.commit().await
    }

    /// Stop tracking `order` and its time. Returns the number of entries dropped.
    pub fn detach(&mut self, order: &InternalOrder) -> usize {
        self.unit_of_work
            .tracking_mut()
            .clear_aggregate(order.id_typed())
    }

    pub async fn exists(&self, id: OrderId) -> Result<bool, RepositoryError> {
        Ok(self.unit_of_work.store().exists(id).await?)
    }

    pub async fn find(&self, id: OrderId) -> Result<Option<InternalOrder>, RepositoryError> {
        Ok(self.unit_of_work.store().fetch(id).await?)
    }

    /// Load an order with its time.
    pub async fn get(&self, id: OrderId) -> Result<InternalOrder, RepositoryError> {
        self.find(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(format!("order {id}")))
    }

    pub async fn list(&self) -> Result<Vec<InternalOrder>, RepositoryError> {
        Ok(self.unit_of_work.store().list().await?)
    }

    pub async fn order_time_exists(&self, id: OrderTimeId) -> Result<bool, RepositoryError> {
        Ok(self.unit_of_work.store().order_time_exists(id).await?)
    }

    pub fn next_order_number(&self) -> u64 {
        OrderNumberSequence::process().next()
    }

    async fn stage(
        &mut self,
        order: &InternalOrder,
        presence: Presence,
    ) -> Result<Vec<StagedEntry>, RepositoryError> {
        // The snapshot read never touches the tracking table.
        let original = self.unit_of_work.store().fetch(order.id_typed()).await?;
        reconcile(
            self.unit_of_work.tracking_mut(),
            order,
            original.as_ref(),
            presence,
        )
    }
}
