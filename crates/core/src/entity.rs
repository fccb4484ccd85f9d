//! Entity trait: identity + continuity across state changes.

/// Anything the ledger tracks by identity rather than by value
/// (stock records, ledger entries, allocations).
pub trait Entity {
    /// Strongly-typed identity (may be composite, e.g. variant + warehouse).
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
