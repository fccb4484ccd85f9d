//! Order fulfillment: multi-line reservation as one unit, plus the
//! confirm / cancel / ship follow-ups driven by the recorded allocations.
//!
//! Calls for the same order are serialized, so a link is only ever read and
//! acted on by one call at a time. Calls for different orders run in parallel
//! and meet only at the per-record locks of the inventory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::instrument;

use stockledger_core::{Aggregate, LedgerError, LedgerResult, OrderId, VariantId};
use stockledger_inventory::{DocumentRef, EntryContext, StockKey, StockRecord, StockStatus};
use stockledger_orders::{
    Allocation, AllocationState, CancelOrder, ConfirmOrder, Order, OrderCommand, OrderEvent,
    OrderLine, PlaceOrder, ShipOrder,
};

use crate::allocations::AllocationStore;
use crate::reservation::ReservationEngine;
use crate::store::InventoryStore;

/// One planned reservation: `line` takes `quantity` from `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlannedReservation {
    key: StockKey,
    line_no: u32,
    quantity: i64,
}

/// One mutex per order with a call in flight.
#[derive(Debug, Default)]
struct OrderLocks {
    slots: Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    /// Run `f` holding the lock for `order_id`.
    fn run<T>(&self, order_id: OrderId, f: impl FnOnce() -> LedgerResult<T>) -> LedgerResult<T> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| LedgerError::storage("order lock map poisoned"))?;
            Arc::clone(slots.entry(order_id).or_default())
        };

        let result = {
            let _guard = slot
                .lock()
                .map_err(|_| LedgerError::storage(format!("lock for order {order_id} poisoned")))?;
            f()
        };

        // Slots are only cloned under the map lock, so a count of two (the map
        // and this call) means nobody else is waiting on it.
        if let Ok(mut slots) = self.slots.lock() {
            if Arc::strong_count(&slot) == 2 {
                slots.remove(&order_id);
            }
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }
}

pub struct OrderFulfillmentCoordinator<S, A> {
    engine: ReservationEngine<S>,
    allocations: A,
    order_locks: OrderLocks,
}

impl<S, A> OrderFulfillmentCoordinator<S, A>
where
    S: InventoryStore,
    A: AllocationStore,
{
    pub fn new(engine: ReservationEngine<S>, allocations: A) -> Self {
        Self {
            engine,
            allocations,
            order_locks: OrderLocks::default(),
        }
    }

    pub fn engine(&self) -> &ReservationEngine<S> {
        &self.engine
    }

    /// Reserve stock for every line of a draft order, or for none of them.
    ///
    /// Each line is served from a single warehouse: the AVAILABLE record with
    /// the most stock on hand that can still cover it. Reservations run in
    /// ascending key order; any failure releases what this call reserved.
    /// Returns the order moved to `pending`.
    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), reference = %order.reference()),
        err
    )]
    pub fn place_order(&self, order: &Order) -> LedgerResult<Order> {
        self.order_locks
            .run(order.id_typed(), || self.place_order_locked(order))
    }

    fn place_order_locked(&self, order: &Order) -> LedgerResult<Order> {
        let events = order.handle(&OrderCommand::PlaceOrder(PlaceOrder {
            order_id: order.id_typed(),
            occurred_at: Utc::now(),
        }))?;
        if !self.allocations.for_order(order.id_typed())?.is_empty() {
            return Err(LedgerError::invalid_state(format!(
                "order {} already holds stock",
                order.id_typed()
            )));
        }

        let mut plan = self.plan(order)?;
        plan.sort_by_key(|p| (p.key, p.line_no));

        let ctx = order_context(order);
        let mut reserved: Vec<PlannedReservation> = Vec::with_capacity(plan.len());
        for step in &plan {
            if let Err(err) = self.engine.reserve(step.key, step.quantity, &ctx) {
                self.roll_back_reservations(order, &reserved, &err);
                return Err(err);
            }
            reserved.push(*step);
        }

        let now = Utc::now();
        let links = plan
            .iter()
            .map(|step| {
                let line = line_by_no(order, step.line_no)?;
                Allocation::reserved(
                    order.id_typed(),
                    line.item_id,
                    step.line_no,
                    step.key,
                    step.quantity,
                    now,
                )
            })
            .collect::<LedgerResult<Vec<_>>>()
            .and_then(|links| self.allocations.insert(links));
        if let Err(err) = links {
            self.roll_back_reservations(order, &reserved, &err);
            return Err(err);
        }

        tracing::info!(lines = plan.len(), "order placed and stock reserved");
        Ok(evolve(order, &events))
    }

    /// Move a pending order to `confirmed`, allocating every reserved link.
    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), reference = %order.reference()),
        err
    )]
    pub fn confirm_order(&self, order: &Order) -> LedgerResult<Order> {
        self.order_locks
            .run(order.id_typed(), || self.confirm_order_locked(order))
    }

    fn confirm_order_locked(&self, order: &Order) -> LedgerResult<Order> {
        let events = order.handle(&OrderCommand::ConfirmOrder(ConfirmOrder {
            order_id: order.id_typed(),
            occurred_at: Utc::now(),
        }))?;

        let mut links = self.links_in(order.id_typed(), AllocationState::Reserved)?;
        links.sort_by_key(|a| (a.key(), a.line_no()));

        let ctx = order_context(order);
        let mut allocated: Vec<&Allocation> = Vec::with_capacity(links.len());
        for link in &links {
            if let Err(err) = self.engine.allocate(link.key(), link.quantity(), &ctx) {
                tracing::warn!(
                    key = %link.key(),
                    error = %err,
                    allocated = allocated.len(),
                    "allocation failed; unallocating links of this call"
                );
                for done in allocated.iter().rev() {
                    if let Err(undo) = self.engine.unallocate(done.key(), done.quantity(), &ctx) {
                        tracing::error!(
                            key = %done.key(),
                            error = %undo,
                            "failed to unallocate during rollback"
                        );
                    }
                }
                return Err(err);
            }
            allocated.push(link);
        }

        let now = Utc::now();
        for mut link in links {
            link.transition(AllocationState::Allocated, now)?;
            self.allocations.update(&link)?;
        }

        Ok(evolve(order, &events))
    }

    /// Cancel an order and give its stock back.
    ///
    /// Every link is handled on its own: reserved links are released,
    /// allocated links are unallocated then released. A link's state is stored
    /// as soon as its stock operation commits, so after a failure (the first
    /// one is returned) calling this again finishes the remaining links.
    #[instrument(
        skip(self, order, reason),
        fields(order_id = %order.id_typed(), reference = %order.reference()),
        err
    )]
    pub fn cancel_order(&self, order: &Order, reason: Option<&str>) -> LedgerResult<Order> {
        self.order_locks
            .run(order.id_typed(), || self.cancel_order_locked(order, reason))
    }

    fn cancel_order_locked(&self, order: &Order, reason: Option<&str>) -> LedgerResult<Order> {
        let events = order.handle(&OrderCommand::CancelOrder(CancelOrder {
            order_id: order.id_typed(),
            reason: reason.map(str::to_string),
            occurred_at: Utc::now(),
        }))?;

        let mut links = self.allocations.for_order(order.id_typed())?;
        links.retain(|a| !a.state().is_terminal());
        links.sort_by_key(|a| (a.key(), a.line_no()));

        let mut ctx = order_context(order);
        if let Some(reason) = reason {
            ctx = ctx.with_notes(format!("order cancelled: {reason}"));
        }

        let mut first_error = None;
        for link in links {
            if let Err(err) = self.return_link(link, &ctx) {
                tracing::warn!(error = %err, "failed to return stock for cancelled order");
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(evolve(order, &events))
    }

    /// Ship a confirmed order: every allocated link is consumed with a sale.
    #[instrument(
        skip(self, order),
        fields(order_id = %order.id_typed(), reference = %order.reference()),
        err
    )]
    pub fn ship_order(&self, order: &Order) -> LedgerResult<Order> {
        self.order_locks
            .run(order.id_typed(), || self.ship_order_locked(order))
    }

    fn ship_order_locked(&self, order: &Order) -> LedgerResult<Order> {
        let events = order.handle(&OrderCommand::ShipOrder(ShipOrder {
            order_id: order.id_typed(),
            occurred_at: Utc::now(),
        }))?;

        let mut links = self.links_in(order.id_typed(), AllocationState::Allocated)?;
        links.sort_by_key(|a| (a.key(), a.line_no()));

        let ctx = order_context(order);
        let mut first_error = None;
        for mut link in links {
            let shipped = self
                .engine
                .sale(link.key(), link.quantity(), &ctx)
                .and_then(|_| link.transition(AllocationState::Consumed, Utc::now()))
                .and_then(|_| self.allocations.update(&link));
            if let Err(err) = shipped {
                tracing::warn!(key = %link.key(), error = %err, "failed to ship allocation");
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(evolve(order, &events))
    }

    /// Allocation links recorded for an order, in line order.
    pub fn allocations(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>> {
        self.allocations.for_order(order_id)
    }

    fn plan(&self, order: &Order) -> LedgerResult<Vec<PlannedReservation>> {
        let mut candidates: HashMap<VariantId, Vec<StockRecord>> = HashMap::new();
        let mut planned: HashMap<StockKey, i64> = HashMap::new();
        let mut plan = Vec::with_capacity(order.lines().len());

        let mut lines: Vec<&OrderLine> = order.lines().iter().collect();
        lines.sort_by_key(|l| l.line_no);

        for line in lines {
            if !candidates.contains_key(&line.variant_id) {
                let mut records: Vec<StockRecord> = self
                    .engine
                    .records_for_variant(line.variant_id)?
                    .into_iter()
                    .filter(|r| r.status() == StockStatus::Available)
                    .collect();
                records.sort_by(|a, b| b.on_hand().cmp(&a.on_hand()).then(a.key().cmp(&b.key())));
                candidates.insert(line.variant_id, records);
            }
            let records = candidates
                .get(&line.variant_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let remaining = |r: &StockRecord| r.available() - planned.get(&r.key()).copied().unwrap_or(0);
            let chosen = records
                .iter()
                .find(|r| remaining(*r) >= line.quantity)
                .map(StockRecord::key);

            let Some(key) = chosen else {
                let best = records.iter().map(remaining).max().unwrap_or(0).max(0);
                tracing::warn!(
                    variant_id = %line.variant_id,
                    line_no = line.line_no,
                    requested = line.quantity,
                    best_available = best,
                    "no warehouse can cover order line"
                );
                return Err(LedgerError::insufficient_stock(
                    line.variant_id,
                    line.quantity,
                    best,
                ));
            };

            *planned.entry(key).or_insert(0) += line.quantity;
            plan.push(PlannedReservation {
                key,
                line_no: line.line_no,
                quantity: line.quantity,
            });
        }
        Ok(plan)
    }

    fn roll_back_reservations(
        &self,
        order: &Order,
        reserved: &[PlannedReservation],
        cause: &LedgerError,
    ) {
        if reserved.is_empty() {
            return;
        }
        tracing::warn!(
            error = %cause,
            reserved = reserved.len(),
            "order placement failed; releasing reservations of this call"
        );
        let ctx = order_context(order).with_notes("rollback of failed order placement");
        for step in reserved.iter().rev() {
            if let Err(err) = self.engine.release(step.key, step.quantity, &ctx) {
                tracing::error!(
                    key = %step.key,
                    quantity = step.quantity,
                    error = %err,
                    "failed to release reservation during rollback"
                );
            }
        }
    }

    fn links_in(&self, order_id: OrderId, state: AllocationState) -> LedgerResult<Vec<Allocation>> {
        let mut links = self.allocations.for_order(order_id)?;
        links.retain(|a| a.state() == state);
        Ok(links)
    }

    fn return_link(&self, mut link: Allocation, ctx: &EntryContext) -> LedgerResult<()> {
        if link.state() == AllocationState::Allocated {
            self.engine.unallocate(link.key(), link.quantity(), ctx)?;
            link.transition(AllocationState::Reserved, Utc::now())?;
            self.allocations.update(&link)?;
        }
        self.engine.release(link.key(), link.quantity(), ctx)?;
        link.transition(AllocationState::Released, Utc::now())?;
        self.allocations.update(&link)
    }
}

fn order_context(order: &Order) -> EntryContext {
    let ctx = EntryContext::new()
        .with_reference(order.ledger_reference())
        .with_document(DocumentRef::Order(order.id_typed()));
    match order.customer() {
        Some(customer) => ctx.by(customer),
        None => ctx,
    }
}

fn line_by_no(order: &Order, line_no: u32) -> LedgerResult<&OrderLine> {
    order
        .lines()
        .iter()
        .find(|l| l.line_no == line_no)
        .ok_or_else(|| LedgerError::invalid_state(format!("order line {line_no} disappeared")))
}

fn evolve(order: &Order, events: &[OrderEvent]) -> Order {
    let mut next = order.clone();
    for event in events {
        next.apply(event);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocations::InMemoryAllocationStore;
    use crate::store::{Committed, InMemoryInventoryStore};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use stockledger_core::{OrderItemId, WarehouseId};
    use stockledger_inventory::{LedgerEntry, Movement, TransactionType};
    use stockledger_orders::{AddLine, CreateOrder, OrderStatus};

    /// In-memory store that records lock order and can fail one chosen call.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryInventoryStore,
        calls: AtomicUsize,
        fail_at: AtomicUsize,
        locked: Mutex<Vec<StockKey>>,
    }

    impl FlakyStore {
        /// Fail the `n`th `with_lock` call from now (1-based).
        fn fail_call(&self, n: usize) {
            let now = self.calls.load(Ordering::SeqCst);
            self.fail_at.store(now + n, Ordering::SeqCst);
        }

        fn take_locked(&self) -> Vec<StockKey> {
            std::mem::take(&mut *self.locked.lock().unwrap())
        }
    }

    impl InventoryStore for FlakyStore {
        fn create(&self, record: StockRecord) -> LedgerResult<StockRecord> {
            self.inner.create(record)
        }

        fn get(&self, key: StockKey) -> LedgerResult<StockRecord> {
            self.inner.get(key)
        }

        fn list_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
            self.inner.list_for_variant(variant_id)
        }

        fn with_lock(
            &self,
            key: StockKey,
            movement: &Movement,
            ctx: &EntryContext,
        ) -> LedgerResult<Committed> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.locked.lock().unwrap().push(key);
            if call == self.fail_at.load(Ordering::SeqCst) {
                return Err(LedgerError::storage("injected failure"));
            }
            self.inner.with_lock(key, movement, ctx)
        }

        fn entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
            self.inner.entries(key)
        }
    }

    type TestCoordinator = OrderFulfillmentCoordinator<Arc<FlakyStore>, Arc<InMemoryAllocationStore>>;

    fn test_coordinator() -> (TestCoordinator, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        let coordinator = OrderFulfillmentCoordinator::new(
            ReservationEngine::new(Arc::clone(&store)),
            Arc::new(InMemoryAllocationStore::new()),
        );
        (coordinator, store)
    }

    fn stock(coordinator: &TestCoordinator, variant_id: VariantId, on_hand: i64) -> StockKey {
        let key = StockKey::new(variant_id, WarehouseId::new());
        let engine = coordinator.engine();
        engine.create_record(StockRecord::new(key, Utc::now())).unwrap();
        if on_hand > 0 {
            engine
                .receipt(key, on_hand, None, None, &EntryContext::new())
                .unwrap();
        }
        key
    }

    fn draft_order(lines: &[(VariantId, i64)]) -> Order {
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        let mut commands = vec![OrderCommand::CreateOrder(CreateOrder {
            order_id,
            reference: "SO-1001".to_string(),
            customer: None,
            occurred_at: Utc::now(),
        })];
        for (variant_id, quantity) in lines {
            commands.push(OrderCommand::AddLine(AddLine {
                order_id,
                item_id: OrderItemId::new(),
                variant_id: *variant_id,
                quantity: *quantity,
                unit_price: 1_500,
                occurred_at: Utc::now(),
            }));
        }
        for command in commands {
            for event in order.handle(&command).unwrap() {
                order.apply(&event);
            }
        }
        order
    }

    fn reserved(coordinator: &TestCoordinator, key: StockKey) -> i64 {
        coordinator.engine().stock_record(key).unwrap().reserved()
    }

    #[test]
    fn place_order_reserves_every_line_and_records_links() {
        let (coordinator, _) = test_coordinator();
        let shirt = VariantId::new();
        let mug = VariantId::new();
        let shirt_key = stock(&coordinator, shirt, 5);
        let mug_key = stock(&coordinator, mug, 4);
        let order = draft_order(&[(shirt, 2), (mug, 4)]);

        let placed = coordinator.place_order(&order).unwrap();
        assert_eq!(placed.status(), OrderStatus::Pending);
        assert_eq!(reserved(&coordinator, shirt_key), 2);
        assert_eq!(reserved(&coordinator, mug_key), 4);

        let links = coordinator.allocations(order.id_typed()).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].line_no(), 1);
        assert_eq!(links[0].key(), shirt_key);
        assert!(links.iter().all(|l| l.state() == AllocationState::Reserved));

        let entry = coordinator.engine().ledger(shirt_key).unwrap().pop().unwrap();
        assert_eq!(entry.reference(), Some("order:SO-1001"));
        assert_eq!(entry.document(), Some(DocumentRef::Order(order.id_typed())));
    }

    #[test]
    fn insufficient_line_releases_everything() {
        let (coordinator, _) = test_coordinator();
        let first = VariantId::new();
        let second = VariantId::new();
        let first_key = stock(&coordinator, first, 5);
        stock(&coordinator, second, 2);
        let order = draft_order(&[(first, 3), (second, 10)]);

        let err = coordinator.place_order(&order).unwrap_err();
        match err {
            LedgerError::InsufficientStock {
                variant,
                requested,
                available,
            } => {
                assert_eq!(variant, second);
                assert_eq!(requested, 10);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(reserved(&coordinator, first_key), 0);
        assert!(coordinator.allocations(order.id_typed()).unwrap().is_empty());
    }

    #[test]
    fn picks_highest_on_hand_that_covers_the_line() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        let small = stock(&coordinator, variant, 3);
        let large = stock(&coordinator, variant, 9);
        let held = stock(&coordinator, variant, 20);
        coordinator
            .engine()
            .set_status(held, StockStatus::OnHold, None, &EntryContext::new())
            .unwrap();

        let placed = coordinator.place_order(&draft_order(&[(variant, 2)])).unwrap();
        assert_eq!(placed.status(), OrderStatus::Pending);
        assert_eq!(reserved(&coordinator, large), 2);
        assert_eq!(reserved(&coordinator, small), 0);
        assert_eq!(reserved(&coordinator, held), 0);
    }

    #[test]
    fn lines_of_one_variant_share_planned_stock() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        let big = stock(&coordinator, variant, 6);
        let other = stock(&coordinator, variant, 5);

        coordinator
            .place_order(&draft_order(&[(variant, 4), (variant, 4)]))
            .unwrap();
        assert_eq!(reserved(&coordinator, big), 4);
        assert_eq!(reserved(&coordinator, other), 4);
    }

    #[test]
    fn reservations_run_in_ascending_key_order() {
        let (coordinator, store) = test_coordinator();
        let variants: Vec<VariantId> = (0..4).map(|_| VariantId::new()).collect();
        let mut keys: Vec<StockKey> = variants.iter().map(|v| stock(&coordinator, *v, 10)).collect();
        store.take_locked();

        let lines: Vec<(VariantId, i64)> = variants.iter().rev().map(|v| (*v, 1)).collect();
        coordinator.place_order(&draft_order(&lines)).unwrap();

        keys.sort();
        assert_eq!(store.take_locked(), keys);
    }

    #[test]
    fn failed_reserve_at_execution_is_compensated() {
        let (coordinator, store) = test_coordinator();
        let first = VariantId::new();
        let second = VariantId::new();
        let a = stock(&coordinator, first, 5);
        let b = stock(&coordinator, second, 5);
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        store.fail_call(2);

        let order = draft_order(&[(first, 3), (second, 1)]);
        let err = coordinator.place_order(&order).unwrap_err();
        assert_eq!(err.kind(), "Storage");

        assert_eq!(reserved(&coordinator, low), 0);
        assert_eq!(reserved(&coordinator, high), 0);
        let types: Vec<TransactionType> = coordinator
            .engine()
            .ledger(low)
            .unwrap()
            .iter()
            .map(LedgerEntry::transaction_type)
            .collect();
        assert_eq!(
            types,
            vec![
                TransactionType::Receipt,
                TransactionType::Reservation,
                TransactionType::Release
            ]
        );
        coordinator.engine().verify_ledger(low).unwrap();
    }

    #[test]
    fn place_requires_draft() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        stock(&coordinator, variant, 5);
        let placed = coordinator.place_order(&draft_order(&[(variant, 1)])).unwrap();

        let err = coordinator.place_order(&placed).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[test]
    fn confirm_then_ship_consumes_stock() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        let key = stock(&coordinator, variant, 10);
        let order = draft_order(&[(variant, 3)]);

        let placed = coordinator.place_order(&order).unwrap();
        let confirmed = coordinator.confirm_order(&placed).unwrap();
        assert_eq!(confirmed.status(), OrderStatus::Confirmed);
        let record = coordinator.engine().stock_record(key).unwrap();
        assert_eq!((record.reserved(), record.allocated()), (0, 3));

        let shipped = coordinator.ship_order(&confirmed).unwrap();
        assert_eq!(shipped.status(), OrderStatus::Shipped);
        let record = coordinator.engine().stock_record(key).unwrap();
        assert_eq!((record.on_hand(), record.allocated()), (7, 0));
        assert!(coordinator
            .allocations(order.id_typed())
            .unwrap()
            .iter()
            .all(|l| l.state() == AllocationState::Consumed));
        coordinator.engine().verify_ledger(key).unwrap();
    }

    #[test]
    fn cancel_confirmed_order_returns_stock() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        let key = stock(&coordinator, variant, 10);

        let placed = coordinator.place_order(&draft_order(&[(variant, 4)])).unwrap();
        let confirmed = coordinator.confirm_order(&placed).unwrap();
        let cancelled = coordinator
            .cancel_order(&confirmed, Some("customer request"))
            .unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        let record = coordinator.engine().stock_record(key).unwrap();
        assert_eq!(record.available(), 10);
        assert_eq!(record.allocated(), 0);
        let last = coordinator.engine().ledger(key).unwrap().pop().unwrap();
        assert_eq!(last.transaction_type(), TransactionType::Release);
        assert_eq!(last.notes(), Some("order cancelled: customer request"));
    }

    #[test]
    fn cancel_can_be_retried_after_a_failure() {
        let (coordinator, store) = test_coordinator();
        let first = VariantId::new();
        let second = VariantId::new();
        let a = stock(&coordinator, first, 5);
        let b = stock(&coordinator, second, 5);
        let placed = coordinator
            .place_order(&draft_order(&[(first, 2), (second, 2)]))
            .unwrap();

        store.fail_call(2);
        let err = coordinator.cancel_order(&placed, None).unwrap_err();
        assert_eq!(err.kind(), "Storage");
        assert_eq!(reserved(&coordinator, a) + reserved(&coordinator, b), 2);

        let cancelled = coordinator.cancel_order(&placed, None).unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(reserved(&coordinator, a), 0);
        assert_eq!(reserved(&coordinator, b), 0);
    }

    #[test]
    fn failed_allocate_is_compensated() {
        let (coordinator, store) = test_coordinator();
        let first = VariantId::new();
        let second = VariantId::new();
        let a = stock(&coordinator, first, 5);
        let b = stock(&coordinator, second, 5);
        let placed = coordinator
            .place_order(&draft_order(&[(first, 1), (second, 1)]))
            .unwrap();

        store.fail_call(2);
        assert!(coordinator.confirm_order(&placed).is_err());
        for key in [a, b] {
            let record = coordinator.engine().stock_record(key).unwrap();
            assert_eq!((record.reserved(), record.allocated()), (1, 0));
        }
        assert!(coordinator
            .allocations(placed.id_typed())
            .unwrap()
            .iter()
            .all(|l| l.state() == AllocationState::Reserved));
    }

    #[test]
    fn ship_requires_confirmation() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        stock(&coordinator, variant, 5);
        let placed = coordinator.place_order(&draft_order(&[(variant, 1)])).unwrap();

        let err = coordinator.ship_order(&placed).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }
    #[test]
    fn placing_the_same_draft_twice_is_rejected() {
        let (coordinator, _) = test_coordinator();
        let variant = VariantId::new();
        let first = stock(&coordinator, variant, 4);
        let second = stock(&coordinator, variant, 3);
        let order = draft_order(&[(variant, 3)]);

        coordinator.place_order(&order).unwrap();
        let err = coordinator.place_order(&order).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(reserved(&coordinator, first) + reserved(&coordinator, second), 3);
        assert_eq!(coordinator.allocations(order.id_typed()).unwrap().len(), 1);
    }

    /// Link store that reads, then stalls, so overlapping calls see the same links.
    #[derive(Default)]
    struct SlowLinks {
        inner: InMemoryAllocationStore,
    }

    impl AllocationStore for SlowLinks {
        fn insert(&self, allocations: Vec<Allocation>) -> LedgerResult<()> {
            self.inner.insert(allocations)
        }

        fn update(&self, allocation: &Allocation) -> LedgerResult<()> {
            self.inner.update(allocation)
        }

        fn for_order(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>> {
            let links = self.inner.for_order(order_id);
            thread::sleep(Duration::from_millis(50));
            links
        }
    }

    type SlowCoordinator = OrderFulfillmentCoordinator<Arc<InMemoryInventoryStore>, SlowLinks>;

    /// A record with 10 on hand, 3 of them held by a cart, and a pending
    /// order for 3 more.
    fn shared_record_with_pending_order() -> (Arc<SlowCoordinator>, StockKey, Order) {
        let coordinator = OrderFulfillmentCoordinator::new(
            ReservationEngine::new(Arc::new(InMemoryInventoryStore::new())),
            SlowLinks::default(),
        );
        let variant = VariantId::new();
        let key = StockKey::new(variant, WarehouseId::new());
        let engine = coordinator.engine();
        engine.create_record(StockRecord::new(key, Utc::now())).unwrap();
        engine
            .receipt(key, 10, None, None, &EntryContext::new())
            .unwrap();
        engine
            .reserve(key, 3, &EntryContext::new().with_reference("cart:other"))
            .unwrap();
        let placed = coordinator.place_order(&draft_order(&[(variant, 3)])).unwrap();
        (Arc::new(coordinator), key, placed)
    }

    fn run_twice<F>(coordinator: &Arc<SlowCoordinator>, call: F) -> Vec<LedgerResult<Order>>
    where
        F: Fn(&SlowCoordinator) -> LedgerResult<Order> + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let coordinator = Arc::clone(coordinator);
                let barrier = Arc::clone(&barrier);
                let call = Arc::clone(&call);
                thread::spawn(move || {
                    barrier.wait();
                    call(&coordinator)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn count_entries(coordinator: &SlowCoordinator, key: StockKey, kind: TransactionType) -> usize {
        coordinator
            .engine()
            .ledger(key)
            .unwrap()
            .iter()
            .filter(|e| e.transaction_type() == kind)
            .count()
    }

    #[test]
    fn overlapping_cancels_release_the_order_once() {
        let (coordinator, key, placed) = shared_record_with_pending_order();

        let results = run_twice(&coordinator, move |c| c.cancel_order(&placed, None));
        assert!(results.iter().all(Result::is_ok), "{results:?}");

        // The cart's hold is untouched.
        let record = coordinator.engine().stock_record(key).unwrap();
        assert_eq!(record.reserved(), 3);
        assert_eq!(count_entries(&coordinator, key, TransactionType::Release), 1);
        coordinator.engine().verify_ledger(key).unwrap();
        assert_eq!(coordinator.order_locks.len(), 0);
    }

    #[test]
    fn overlapping_confirms_allocate_the_order_once() {
        let (coordinator, key, placed) = shared_record_with_pending_order();

        let results = run_twice(&coordinator, move |c| c.confirm_order(&placed));
        assert!(results.iter().all(Result::is_ok), "{results:?}");

        let record = coordinator.engine().stock_record(key).unwrap();
        assert_eq!((record.reserved(), record.allocated()), (3, 3));
        assert_eq!(count_entries(&coordinator, key, TransactionType::Allocation), 1);
        coordinator.engine().verify_ledger(key).unwrap();
    }
}
