//! Aggregate root trait and optimistic concurrency expectations.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// A root is the unit of reconciliation: it is fetched, diffed and persisted
/// together with the dependent records it owns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Concurrency token of the root row.
    ///
    /// `0` means the root has never been persisted. Storage backends assign `1`
    /// on insert and increment on every successful update.
    fn version(&self) -> u64;
}

/// Version token a caller expects a stored row to be at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.0 == actual {
            Ok(())
        } else {
            Err(DomainError::VersionMismatch {
                expected: self.0,
                actual,
            })
        }
    }
}
