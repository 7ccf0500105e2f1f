//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes
/// (stock keys, cost layers, allocation slices).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
