//! Infrastructure layer: change tracking, reconciliation, unit of work,
//! storage backends and the order repository.

pub mod config;
pub mod error;
pub mod reconcile;
pub mod repository;
pub mod store;
pub mod tracking;
pub mod unit_of_work;

pub use config::{ConfigError, StoreConfig};
pub use error::RepositoryError;
pub use reconcile::{Presence, reconcile};
pub use repository::{OrderNumberSequence, OrderRepository};
pub use store::{BatchOutcome, InMemoryOrderStore, OrderStore, SqliteOrderStore, StoreError};
pub use tracking::{
    EntityRecord, EntityState, Operation, OrderRecord, StagedEntry, TrackingConflict,
    TrackingTable,
};
pub use unit_of_work::{CommitSummary, UnitOfWork};
