//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. An order number
/// is a value object; an order time is an entity (it has an identity that
/// survives changes to its display text).
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct OrderNumber(String);
///
/// impl ValueObject for OrderNumber {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
