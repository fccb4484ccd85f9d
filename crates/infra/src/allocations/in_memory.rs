use std::collections::HashMap;
use std::sync::RwLock;

use stockledger_core::{LedgerError, LedgerResult, OrderId};
use stockledger_orders::Allocation;

use super::AllocationStore;

#[derive(Debug, Default)]
pub struct InMemoryAllocationStore {
    by_order: RwLock<HashMap<OrderId, Vec<Allocation>>>,
}

impl InMemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationStore for InMemoryAllocationStore {
    fn insert(&self, allocations: Vec<Allocation>) -> LedgerResult<()> {
        let mut by_order = self
            .by_order
            .write()
            .map_err(|_| LedgerError::storage("allocation lock poisoned"))?;

        for (idx, a) in allocations.iter().enumerate() {
            let linked = |b: &Allocation| b.order_item_id() == a.order_item_id() && b.key() == a.key();
            let existing = by_order
                .get(&a.order_id())
                .is_some_and(|links| links.iter().any(linked));
            if existing || allocations[..idx].iter().any(linked) {
                return Err(LedgerError::invalid_state(format!(
                    "order item {} is already linked to {}",
                    a.order_item_id(),
                    a.key()
                )));
            }
        }

        for a in allocations {
            let links = by_order.entry(a.order_id()).or_default();
            links.push(a);
            links.sort_by_key(|l| (l.line_no(), l.key()));
        }
        Ok(())
    }

    fn update(&self, allocation: &Allocation) -> LedgerResult<()> {
        let mut by_order = self
            .by_order
            .write()
            .map_err(|_| LedgerError::storage("allocation lock poisoned"))?;

        let slot = by_order
            .get_mut(&allocation.order_id())
            .and_then(|links| {
                links
                    .iter_mut()
                    .find(|l| l.allocation_id() == allocation.allocation_id())
            })
            .ok_or_else(|| {
                LedgerError::not_found(format!("allocation {}", allocation.allocation_id()))
            })?;
        *slot = allocation.clone();
        Ok(())
    }

    fn for_order(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>> {
        let by_order = self
            .by_order
            .read()
            .map_err(|_| LedgerError::storage("allocation lock poisoned"))?;
        Ok(by_order.get(&order_id).cloned().unwrap_or_default())
    }
}
