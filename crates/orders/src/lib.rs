//! Orders domain module (event-sourced).
//!
//! The `Order` aggregate and the `Allocation` links that tie its lines to
//! stock records. Pure domain logic; stock side effects are driven by the
//! fulfillment coordinator in `stockledger-infra`.

pub mod allocation;
pub mod order;

pub use allocation::{Allocation, AllocationSnapshot, AllocationState};
pub use order::{
    AddLine, CancelOrder, ConfirmOrder, CreateOrder, LineAdded, Order, OrderCancelled,
    OrderCommand, OrderConfirmed, OrderCreated, OrderEvent, OrderLine, OrderPlaced, OrderShipped,
    OrderStatus, PlaceOrder, ShipOrder,
};
