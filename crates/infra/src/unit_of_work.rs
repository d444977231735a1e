use std::collections::HashMap;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use ordertrack_orders::InternalOrder;

use crate::error::RepositoryError;
use crate::store::OrderStore;
use crate::tracking::TrackingTable;

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub affected_rows: u64,
    /// New version token of every inserted or updated entity.
    pub versions: HashMap<Uuid, u64>,
}

impl CommitSummary {
    pub fn version_of(&self, id: impl Into<Uuid>) -> Option<u64> {
        self.versions.get(&id.into()).copied()
    }

    /// Copy the committed version tokens into `order` and its time.
    pub fn apply_to(&self, order: &mut InternalOrder) {
        if let Some(version) = self.version_of(order.id_typed()) {
            order.record_version(version);
        }
        if let Some(time) = order.time_mut() {
            if let Some(version) = self.version_of(time.id_typed()) {
                time.record_version(version);
            }
        }
    }
}

/// One session: a tracking table plus the store it commits to.
///
/// Staging takes `&mut self`, so a unit of work is never shared between
/// concurrent callers. Sessions that need isolation use separate instances
/// over a shared store.
#[derive(Debug)]
pub struct UnitOfWork<S> {
    store: S,
    tracking: TrackingTable,
}

impl<S> UnitOfWork<S>
where
    S: OrderStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            tracking: TrackingTable::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tracking(&self) -> &TrackingTable {
        &self.tracking
    }

    pub fn tracking_mut(&mut self) -> &mut TrackingTable {
        &mut self.tracking
    }

    /// Apply every staged entry as one atomic batch.
    ///
    /// The table is drained before the backend is called, so it is empty
    /// afterwards whether the commit succeeds or fails.
    #[instrument(skip(self), fields(staged = self.tracking.len()), err)]
    pub async fn commit(&mut self) -> Result<CommitSummary, RepositoryError> {
        let batch = self.tracking.drain();
        if batch.is_empty() {
            debug!("nothing staged");
            return Ok(CommitSummary::default());
        }

        let outcome = self.store.apply_batch(batch).await.map_err(|err| {
            warn!(error = %err, "commit rolled back");
            RepositoryError::from(err)
        })?;

        debug!(affected_rows = outcome.affected_rows, "commit applied");
        Ok(CommitSummary {
            affected_rows: outcome.affected_rows,
            versions: outcome.versions.into_iter().collect(),
        })
    }
}
