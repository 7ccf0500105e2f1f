//! Entity trait: records with identity that change status over time
//! (lots, reservations, adjustments).

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Stable entity name used in audit records (e.g. "lot").
    fn entity_name() -> &'static str;
}
