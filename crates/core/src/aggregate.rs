//! Aggregate traits for documents whose lifecycle is driven by commands
//! (orders), as opposed to counters driven by the ledger.

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far.
    fn version(&self) -> u64;
}

/// Pure decide/evolve split.
///
/// - `handle(&self, cmd)` validates a command against current state and returns
///   the events it would produce. It never mutates.
/// - `apply(&mut self, event)` evolves state and bumps `version()` by one.
///
/// Side effects (stock reservations, persistence) belong to the caller, which
/// only applies the events once those effects have succeeded.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
