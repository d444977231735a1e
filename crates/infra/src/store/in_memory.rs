use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use ordertrack_core::{Entity, ExpectedVersion, OrderId, OrderTimeId};
use ordertrack_orders::{InternalOrder, OrderNumber, OrderTime};

use super::r#trait::{BatchOutcome, OrderStore, StoreError};
use crate::tracking::{EntityRecord, Operation, OrderRecord, StagedEntry};

#[derive(Debug, Clone)]
struct OrderRow {
    seq: u64,
    order_number: OrderNumber,
    version: u64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: HashMap<OrderId, OrderRow>,
    times: HashMap<OrderTimeId, OrderTime>,
    next_seq: u64,
}

/// In-memory order store.
///
/// Intended for tests/dev. A batch is applied to a copy of the tables and the
/// copy replaces the live tables only if every entry succeeded, so a failing
/// batch leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    tables: RwLock<Tables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn load(&self, id: OrderId) -> Result<Option<InternalOrder>, StoreError> {
        let Some(row) = self.orders.get(&id) else {
            return Ok(None);
        };
        let time = self.times.values().find(|t| t.order_id() == Some(id)).cloned();
        InternalOrder::from_parts(id, row.order_number.clone(), row.version, time)
            .map(Some)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn apply(&mut self, entry: StagedEntry, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        match (entry.operation, entry.record) {
            (Operation::Added, EntityRecord::Order(r)) => self.insert_order(r, outcome),
            (Operation::Modified, EntityRecord::Order(r)) => self.update_order(r, outcome),
            (Operation::Deleted, EntityRecord::Order(r)) => self.delete_order(r, outcome),
            (Operation::Added, EntityRecord::OrderTime(t)) => self.insert_time(t, outcome),
            (Operation::Modified, EntityRecord::OrderTime(t)) => self.update_time(t, outcome),
            (Operation::Deleted, EntityRecord::OrderTime(t)) => self.delete_time(t, outcome),
        }
    }

    fn insert_order(&mut self, r: OrderRecord, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        if self.orders.contains_key(&r.id) {
            return Err(StoreError::UniqueViolation(format!("order {} already exists", r.id)));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.orders.insert(
            r.id,
            OrderRow {
                seq,
                order_number: r.order_number,
                version: 1,
            },
        );
        outcome.affected_rows += 1;
        outcome.versions.push((r.id.into(), 1));
        Ok(())
    }

    fn update_order(&mut self, r: OrderRecord, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        let row = self
            .orders
            .get_mut(&r.id)
            .ok_or_else(|| StoreError::Concurrency(format!("order {} does not exist", r.id)))?;
        check_version(row.version, r.version, "order", &r.id)?;
        row.order_number = r.order_number;
        row.version += 1;
        outcome.affected_rows += 1;
        outcome.versions.push((r.id.into(), row.version));
        Ok(())
    }

    fn delete_order(&mut self, r: OrderRecord, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        let row = self
            .orders
            .get(&r.id)
            .ok_or_else(|| StoreError::Concurrency(format!("order {} does not exist", r.id)))?;
        check_version(row.version, r.version, "order", &r.id)?;
        if let Some(t) = self.times.values().find(|t| t.order_id() == Some(r.id)) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "order {} is still referenced by order time {}",
                r.id,
                t.id_typed()
            )));
        }
        self.orders.remove(&r.id);
        outcome.affected_rows += 1;
        Ok(())
    }

    fn insert_time(&mut self, mut t: OrderTime, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        let id = t.id_typed();
        if self.times.contains_key(&id) {
            return Err(StoreError::UniqueViolation(format!("order time {id} already exists")));
        }
        self.check_owner(&t)?;
        t.record_version(1);
        self.times.insert(id, t);
        outcome.affected_rows += 1;
        outcome.versions.push((id.into(), 1));
        Ok(())
    }

    fn update_time(&mut self, mut t: OrderTime, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        let id = t.id_typed();
        let stored = self
            .times
            .get(&id)
            .ok_or_else(|| StoreError::Concurrency(format!("order time {id} does not exist")))?;
        check_version(stored.version(), t.version(), "order time", &id)?;
        self.check_owner(&t)?;
        let version = stored.version() + 1;
        t.record_version(version);
        self.times.insert(id, t);
        outcome.affected_rows += 1;
        outcome.versions.push((id.into(), version));
        Ok(())
    }

    fn delete_time(&mut self, t: OrderTime, outcome: &mut BatchOutcome) -> Result<(), StoreError> {
        let id = t.id_typed();
        let stored = self
            .times
            .get(&id)
            .ok_or_else(|| StoreError::Concurrency(format!("order time {id} does not exist")))?;
        check_version(stored.version(), t.version(), "order time", &id)?;
        self.times.remove(&id);
        outcome.affected_rows += 1;
        Ok(())
    }

    /// Foreign key and one-time-per-order checks for a time about to be written.
    fn check_owner(&self, t: &OrderTime) -> Result<(), StoreError> {
        let id = t.id_typed();
        let owner = t.order_id().ok_or_else(|| {
            StoreError::ForeignKeyViolation(format!("order time {id} has no owning order"))
        })?;
        if !self.orders.contains_key(&owner) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "order time {id} references missing order {owner}"
            )));
        }
        if let Some(other) = self
            .times
            .values()
            .find(|other| other.order_id() == Some(owner) && other.id_typed() != id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "order {owner} already has order time {}",
                other.id_typed()
            )));
        }
        Ok(())
    }
}

fn check_version(
    stored: u64,
    expected: u64,
    what: &str,
    id: &dyn core::fmt::Display,
) -> Result<(), StoreError> {
    ExpectedVersion(expected)
        .check(stored)
        .map_err(|e| StoreError::Concurrency(format!("{what} {id}: {e}")))
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn fetch(&self, id: OrderId) -> Result<Option<InternalOrder>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        tables.load(id)
    }

    async fn exists(&self, id: OrderId) -> Result<bool, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(tables.orders.contains_key(&id))
    }

    async fn list(&self) -> Result<Vec<InternalOrder>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let mut ids: Vec<(u64, OrderId)> = tables.orders.iter().map(|(id, row)| (row.seq, *id)).collect();
        ids.sort();

        let mut orders = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(order) = tables.load(id)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn order_time_exists(&self, id: OrderTimeId) -> Result<bool, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(tables.times.contains_key(&id))
    }

    async fn apply_batch(&self, batch: Vec<StagedEntry>) -> Result<BatchOutcome, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let mut working = tables.clone();
        let mut outcome = BatchOutcome::default();
        for entry in batch {
            working.apply(entry, &mut outcome)?;
        }

        *tables = working;
        Ok(outcome)
    }
}
