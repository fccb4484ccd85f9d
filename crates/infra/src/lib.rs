//! Infrastructure layer: stores, reservation engine, order fulfillment, config.
//!
//! Domain rules live in `stockledger-inventory` and `stockledger-orders`; this
//! crate adds locking, persistence, publishing, and orchestration.

pub mod allocations;
pub mod config;
pub mod fulfillment;
pub mod outcome;
pub mod reservation;
pub mod store;


pub use allocations::{AllocationStore, InMemoryAllocationStore, PostgresAllocationStore};
pub use config::{LedgerConfig, LedgerServices, StoreBackend, build_services};
pub use fulfillment::OrderFulfillmentCoordinator;
pub use outcome::OperationOutcome;
pub use reservation::{EngineSettings, ReservationEngine, Transfer};
pub use store::{
    Committed, InMemoryInventoryStore, InventoryStore, PostgresInventoryStore,
    PublishingInventoryStore,
};
