//! Storage for order-line ↔ stock-record links.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use stockledger_core::{LedgerResult, OrderId};
use stockledger_orders::Allocation;

pub use in_memory::InMemoryAllocationStore;
pub use postgres::PostgresAllocationStore;

/// Allocation link storage.
pub trait AllocationStore: Send + Sync {
    /// Insert links atomically. Fails with `InvalidState` (and inserts nothing)
    /// if any (order item, stock key) pair is already linked.
    fn insert(&self, allocations: Vec<Allocation>) -> LedgerResult<()>;

    /// Replace a stored link with its updated state.
    fn update(&self, allocation: &Allocation) -> LedgerResult<()>;

    /// Links of an order, in line order.
    fn for_order(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>>;
}

impl<S> AllocationStore for Arc<S>
where
    S: AllocationStore + ?Sized,
{
    fn insert(&self, allocations: Vec<Allocation>) -> LedgerResult<()> {
        (**self).insert(allocations)
    }

    fn update(&self, allocation: &Allocation) -> LedgerResult<()> {
        (**self).update(allocation)
    }

    fn for_order(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>> {
        (**self).for_order(order_id)
    }
}
