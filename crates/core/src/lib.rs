//! `stockledger-core`: shared building blocks for the stock ledger.
//!
//! Pure primitives only: identifiers, the error model, and the entity /
//! aggregate traits. No IO, no locking.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::{LedgerError, LedgerResult};
pub use id::{AllocationId, LedgerEntryId, OrderId, OrderItemId, UserId, VariantId, WarehouseId};
