//! `ordertrack-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no persistence concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::{Entity, EntityKind};
pub use error::{DomainError, DomainResult};
pub use id::{OrderId, OrderTimeId};
pub use value_object::ValueObject;
