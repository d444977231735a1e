use serde::{Deserialize, Serialize};

use ordertrack_core::{Entity, OrderId, OrderTimeId};

/// Dependent record: the time slot attached to an order.
///
/// `order_id` is the back-reference storage needs for its foreign key. It is
/// set when the time is attached through [`crate::InternalOrder::set_time`]
/// and is never used to reach or mutate the owning order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTime {
    id: OrderTimeId,
    display: String,
    order_id: Option<OrderId>,
    version: u64,
}

impl OrderTime {
    /// Create a new, unattached, never-persisted order time.
    pub fn new(display: impl Into<String>) -> Self {
        Self::with_id(OrderTimeId::new(), display)
    }

    pub fn with_id(id: OrderTimeId, display: impl Into<String>) -> Self {
        Self {
            id,
            display: display.into(),
            order_id: None,
            version: 0,
        }
    }

    /// Rehydrate a persisted order time (used by storage backends).
    pub fn from_parts(
        id: OrderTimeId,
        display: impl Into<String>,
        order_id: OrderId,
        version: u64,
    ) -> Self {
        Self {
            id,
            display: display.into(),
            order_id: Some(order_id),
            version,
        }
    }

    pub fn id_typed(&self) -> OrderTimeId {
        self.id
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn set_display(&mut self, display: impl Into<String>) {
        self.display = display.into();
    }

    /// Owning order, if this time has been attached to one.
    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    /// Store the concurrency token assigned by a successful commit.
    pub fn record_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn attach_to(&mut self, owner: OrderId) {
        self.order_id = Some(owner);
    }
}

impl Entity for OrderTime {
    type Id = OrderTimeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
