use serde::{Deserialize, Serialize};

use ordertrack_core::{AggregateRoot, DomainError, DomainResult, OrderId, ValueObject};

use crate::time::OrderTime;

/// Human-facing order number. Set once when the order is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("order number cannot be empty"));
        }
        Ok(Self(value))
    }

    /// Work-order number for a sequence value, e.g. `W-17`.
    pub fn work_order(sequence: u64) -> Self {
        Self(format!("W-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for OrderNumber {}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate root: an internal order owning zero or one [`OrderTime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalOrder {
    id: OrderId,
    order_number: OrderNumber,
    time: Option<OrderTime>,
    version: u64,
}

impl InternalOrder {
    /// Create a new order with no time attached.
    pub fn new(order_number: OrderNumber) -> Self {
        Self::with_id(OrderId::new(), order_number)
    }

    pub fn with_id(id: OrderId, order_number: OrderNumber) -> Self {
        Self {
            id,
            order_number,
            time: None,
            version: 0,
        }
    }

    /// Rehydrate a persisted order (used by storage backends).
    ///
    /// Rejects a time whose back-reference points at a different order.
    pub fn from_parts(
        id: OrderId,
        order_number: OrderNumber,
        version: u64,
        time: Option<OrderTime>,
    ) -> DomainResult<Self> {
        if let Some(t) = &time {
            if t.order_id() != Some(id) {
                return Err(DomainError::invariant(format!(
                    "order time {} does not reference order {id}",
                    t.id_typed()
                )));
            }
        }
        Ok(Self {
            id,
            order_number,
            time,
            version,
        })
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &OrderNumber {
        &self.order_number
    }

    pub fn time(&self) -> Option<&OrderTime> {
        self.time.as_ref()
    }

    pub fn time_mut(&mut self) -> Option<&mut OrderTime> {
        self.time.as_mut()
    }

    /// Attach `time`, replacing (and returning) any previous one.
    pub fn set_time(&mut self, mut time: OrderTime) -> Option<OrderTime> {
        time.attach_to(self.id);
        self.time.replace(time)
    }

    /// Drop ownership of the current time.
    ///
    /// Storage is not touched here; reconciliation notices the orphan and
    /// stages its delete.
    pub fn remove_time(&mut self) -> Option<OrderTime> {
        self.time.take()
    }

    /// Store the concurrency token assigned by a successful commit.
    pub fn record_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl AggregateRoot for InternalOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
