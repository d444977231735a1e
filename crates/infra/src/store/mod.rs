//! Storage backend boundary for order aggregates.
//!
//! The repository only needs two things from storage: fetch an aggregate
//! without side effects, and apply a batch of staged operations atomically.
//! Backends enforce the foreign key from `order_times` to `orders` and allow
//! at most one live time per order.

pub mod in_memory;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryOrderStore;
pub use r#trait::{BatchOutcome, OrderStore, StoreError};
pub use sqlite::SqliteOrderStore;
