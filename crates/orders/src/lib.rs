//! Orders domain module.
//!
//! An internal order optionally owns a single order time. This crate holds the
//! aggregate's identity and lifecycle rules only (no IO, no storage); which
//! rows to insert, update or delete is decided by the reconciliation engine in
//! `ordertrack-infra`.

pub mod order;
pub mod time;

pub use order::{InternalOrder, OrderNumber};
pub use time::OrderTime;
