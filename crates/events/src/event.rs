use chrono::{DateTime, Utc};

/// A committed fact that can be published.
///
/// Implementors are immutable once created and carry a stable type name so
/// consumers can route payloads without deserializing them first.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.ledger.reservation").
    fn event_type(&self) -> &'static str;

    /// Payload schema version.
    fn version(&self) -> u32;

    /// When the fact was committed.
    fn occurred_at(&self) -> DateTime<Utc>;
}
