//! Ledger event plumbing: the `Event` contract, the envelope committed entries
//! travel in, and a pub/sub bus for downstream consumers (audit feeds,
//! notifications, search indexing).
//!
//! The ledger itself is the source of truth. The bus only distributes what has
//! already been committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
