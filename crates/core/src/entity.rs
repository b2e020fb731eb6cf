//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// A ledger entry is the canonical example here: it keeps its identity while
/// its sale-approval status changes.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
