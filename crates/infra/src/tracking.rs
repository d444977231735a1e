//! Session-scoped change tracking.
//!
//! The [`TrackingTable`] records which persistence operation, if any, is staged
//! for each entity identity in one unit of work. It is plain bookkeeping: no IO,
//! no global state. Identities are keyed by their raw UUID so that one identity
//! can never be tracked twice, even under two different entity kinds.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use ordertrack_core::{AggregateRoot, Entity, EntityKind, OrderId, OrderTimeId};
use ordertrack_orders::{InternalOrder, OrderNumber, OrderTime};

/// Persistence operation staged for an entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Added,
    Modified,
    Deleted,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking state of an identity within a session.
///
/// `Detached` covers both "never seen" and "unchanged": nothing will be
/// written for it at commit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntityState {
    Detached,
    Added,
    Modified,
    Deleted,
}

impl From<Operation> for EntityState {
    fn from(value: Operation) -> Self {
        match value {
            Operation::Added => EntityState::Added,
            Operation::Modified => EntityState::Modified,
            Operation::Deleted => EntityState::Deleted,
        }
    }
}

/// Root row of an order aggregate as staged for persistence.
///
/// `time_id` is not a column; it captures which time the in-memory instance
/// owned when it was staged, so two instances that disagree about their
/// dependent are told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub time_id: Option<OrderTimeId>,
    pub version: u64,
}

impl From<&InternalOrder> for OrderRecord {
    fn from(order: &InternalOrder) -> Self {
        Self {
            id: order.id_typed(),
            order_number: order.order_number().clone(),
            time_id: order.time().map(OrderTime::id_typed),
            version: order.version(),
        }
    }
}

/// Snapshot of the entity a staged operation writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRecord {
    Order(OrderRecord),
    OrderTime(OrderTime),
}

impl EntityRecord {
    pub fn key(&self) -> Uuid {
        match self {
            EntityRecord::Order(r) => *r.id.as_uuid(),
            EntityRecord::OrderTime(t) => *t.id_typed().as_uuid(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Order(_) => EntityKind::Order,
            EntityRecord::OrderTime(_) => EntityKind::OrderTime,
        }
    }

    /// Version the caller last saw; stores check it on update and delete.
    pub fn version(&self) -> u64 {
        match self {
            EntityRecord::Order(r) => r.version,
            EntityRecord::OrderTime(t) => t.version(),
        }
    }
}

/// One staged (identity, operation) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    pub operation: Operation,
    pub record: EntityRecord,
}

impl StagedEntry {
    pub fn new(operation: Operation, record: EntityRecord) -> Self {
        Self { operation, record }
    }

    pub fn order(operation: Operation, order: &InternalOrder) -> Self {
        Self::new(operation, EntityRecord::Order(OrderRecord::from(order)))
    }

    pub fn time(operation: Operation, time: &OrderTime) -> Self {
        Self::new(operation, EntityRecord::OrderTime(time.clone()))
    }

    pub fn key(&self) -> Uuid {
        self.record.key()
    }

    pub fn kind(&self) -> EntityKind {
        self.record.kind()
    }
}

/// Two incompatible intents for one identity in the same session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {id} is already tracked: {reason}")]
pub struct TrackingConflict {
    pub id: Uuid,
    pub kind: EntityKind,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Tracked {
    seq: u64,
    entry: StagedEntry,
}

/// Registry of staged operations for one unit-of-work session.
///
/// Holds at most one entry per identity. Re-staging a known identity clears the
/// old entry and appends the new one, so [`TrackingTable::drain`] always yields
/// the newest intent in the order it was staged.
#[derive(Debug, Clone, Default)]
pub struct TrackingTable {
    entries: HashMap<Uuid, Tracked>,
    next_seq: u64,
}

impl TrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an operation for the entry's identity.
    ///
    /// An existing entry is replaced when the new intent is compatible with it
    /// (same kind, and either a delete or the same record). Anything else is a
    /// [`TrackingConflict`] and leaves the table unchanged.
    pub fn stage(&mut self, entry: StagedEntry) -> Result<(), TrackingConflict> {
        let key = entry.key();
        if let Some(existing) = self.entries.get(&key) {
            if let Err(conflict) = check_compatible(&existing.entry, &entry) {
                warn!(id = %key, kind = %conflict.kind, reason = %conflict.reason, "tracking conflict");
                return Err(conflict);
            }
        }

        self.clear(key);
        debug!(id = %key, kind = %entry.kind(), operation = %entry.operation, "staged");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key, Tracked { seq, entry });
        Ok(())
    }

    /// Stage several entries in order, all or nothing.
    pub fn stage_all(&mut self, entries: Vec<StagedEntry>) -> Result<(), TrackingConflict> {
        let mut working = self.clone();
        for entry in entries {
            working.stage(entry)?;
        }
        *self = working;
        Ok(())
    }

    /// Currently staged operation for an identity, if any.
    pub fn lookup(&self, id: impl Into<Uuid>) -> Option<Operation> {
        self.entries.get(&id.into()).map(|t| t.entry.operation)
    }

    pub fn state(&self, id: impl Into<Uuid>) -> EntityState {
        self.lookup(id).map_or(EntityState::Detached, EntityState::from)
    }

    pub fn get(&self, id: impl Into<Uuid>) -> Option<&StagedEntry> {
        self.entries.get(&id.into()).map(|t| &t.entry)
    }

    /// Detach an identity, returning whatever was staged for it.
    pub fn clear(&mut self, id: impl Into<Uuid>) -> Option<StagedEntry> {
        self.entries.remove(&id.into()).map(|t| t.entry)
    }

    /// Detach an order and every staged time that references it.
    ///
    /// Returns the number of entries removed.
    pub fn clear_aggregate(&mut self, order_id: OrderId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, tracked| match &tracked.entry.record {
            EntityRecord::Order(r) => r.id != order_id,
            EntityRecord::OrderTime(t) => t.order_id() != Some(order_id),
        });
        before - self.entries.len()
    }

    /// Staged entries in staging order.
    pub fn entries(&self) -> Vec<&StagedEntry> {
        let mut tracked: Vec<&Tracked> = self.entries.values().collect();
        tracked.sort_by_key(|t| t.seq);
        tracked.into_iter().map(|t| &t.entry).collect()
    }

    /// Remove and return every staged entry, in staging order.
    pub fn drain(&mut self) -> Vec<StagedEntry> {
        let mut tracked: Vec<Tracked> = self.entries.drain().map(|(_, t)| t).collect();
        tracked.sort_by_key(|t| t.seq);
        tracked.into_iter().map(|t| t.entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_compatible(existing: &StagedEntry, incoming: &StagedEntry) -> Result<(), TrackingConflict> {
    let conflict = |reason: String| TrackingConflict {
        id: incoming.key(),
        kind: incoming.kind(),
        reason,
    };

    if existing.kind() != incoming.kind() {
        return Err(conflict(format!(
            "identity is staged as {} ({})",
            existing.kind(),
            existing.operation
        )));
    }
    if incoming.operation == Operation::Deleted || existing.record == incoming.record {
        return Ok(());
    }
    Err(conflict(format!(
        "staged as {} with a different record, cannot stage as {}",
        existing.operation, incoming.operation
    )))
}
