//! Reservation engine: the public state transitions on stock records.
//!
//! Every operation validates its arguments, runs one [`Movement`] under
//! [`InventoryStore::with_lock`] for exactly one key, and returns the committed
//! record and ledger entry. Nothing is retried; every failure is returned.

use chrono::Utc;
use tracing::instrument;

use stockledger_core::{LedgerError, LedgerResult, VariantId, WarehouseId};
use stockledger_inventory::{
    EntryContext, LedgerEntry, Movement, StockCounters, StockKey, StockRecord, StockStatus,
};

use crate::store::{Committed, InventoryStore};

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Currency stamped on receipts that carry a cost but no currency.
    pub default_currency: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

/// Both legs of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub outbound: Committed,
    pub inbound: Committed,
}

#[derive(Debug, Clone)]
pub struct ReservationEngine<S> {
    store: S,
    settings: EngineSettings,
}

impl<S> ReservationEngine<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self::with_settings(store, EngineSettings::default())
    }

    pub fn with_settings(store: S, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn run(&self, key: StockKey, movement: Movement, ctx: &EntryContext) -> LedgerResult<Committed> {
        movement.validate()?;
        let committed = self.store.with_lock(key, &movement, ctx)?;
        tracing::debug!(
            key = %key,
            transaction_type = %committed.entry.transaction_type(),
            sequence = committed.entry.sequence(),
            on_hand = committed.record.on_hand(),
            reserved = committed.record.reserved(),
            allocated = committed.record.allocated(),
            "ledger entry committed"
        );
        Ok(committed)
    }

    /// Start stocking a variant in a warehouse (zero counters).
    #[instrument(skip(self, record), fields(key = %record.key()), err)]
    pub fn create_record(&self, record: StockRecord) -> LedgerResult<StockRecord> {
        self.store.create(record)
    }

    /// Hold `quantity` of available stock (cart or order).
    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn reserve(&self, key: StockKey, quantity: i64, ctx: &EntryContext) -> LedgerResult<Committed> {
        self.run(key, Movement::Reserve { quantity }, ctx)
    }

    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn release(&self, key: StockKey, quantity: i64, ctx: &EntryContext) -> LedgerResult<Committed> {
        self.run(key, Movement::Release { quantity }, ctx)
    }

    /// Commit reserved stock to an order.
    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn allocate(&self, key: StockKey, quantity: i64, ctx: &EntryContext) -> LedgerResult<Committed> {
        self.run(key, Movement::Allocate { quantity }, ctx)
    }

    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn unallocate(
        &self,
        key: StockKey,
        quantity: i64,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        self.run(key, Movement::Unallocate { quantity }, ctx)
    }

    /// Goods in. A cost without a currency gets the configured default currency.
    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn receipt(
        &self,
        key: StockKey,
        quantity: i64,
        cost_price: Option<i64>,
        currency: Option<&str>,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        let currency = match (cost_price, currency) {
            (_, Some(code)) => Some(code.to_string()),
            (Some(_), None) => Some(self.settings.default_currency.clone()),
            (None, None) => None,
        };
        self.run(
            key,
            Movement::Receipt {
                quantity,
                cost_price,
                currency,
            },
            ctx,
        )
    }

    /// Correct on-hand stock by a signed delta (cycle counts, shrinkage).
    #[instrument(skip(self, ctx), fields(key = %key), err)]
    pub fn adjustment(
        &self,
        key: StockKey,
        delta: i64,
        reason: Option<&str>,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        self.run(
            key,
            Movement::Adjust {
                delta,
                reason: reason.map(str::to_string),
            },
            ctx,
        )
    }

    /// Consume allocated stock on shipment.
    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn sale(&self, key: StockKey, quantity: i64, ctx: &EntryContext) -> LedgerResult<Committed> {
        self.run(key, Movement::Sale { quantity }, ctx)
    }

    /// Customer return back into on-hand stock.
    #[instrument(skip(self, ctx), fields(key = %key, reference = ?ctx.reference), err)]
    pub fn return_stock(
        &self,
        key: StockKey,
        quantity: i64,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        self.run(key, Movement::Return { quantity }, ctx)
    }

    /// Move available stock between warehouses.
    ///
    /// Each leg locks only its own key. The destination record is created on
    /// demand once the outbound leg has committed. If the inbound leg fails,
    /// the outbound leg is reversed with a `transfer_in` back into the source.
    #[instrument(skip(self, ctx), fields(variant_id = %variant_id, from = %from, to = %to), err)]
    pub fn transfer(
        &self,
        variant_id: VariantId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: i64,
        ctx: &EntryContext,
    ) -> LedgerResult<Transfer> {
        if from == to {
            return Err(LedgerError::invalid_argument(
                "transfer source and destination must differ",
            ));
        }
        let source = StockKey::new(variant_id, from);
        let destination = StockKey::new(variant_id, to);
        let outbound_move = Movement::TransferOut { quantity, to };
        outbound_move.validate()?;

        let outbound = self.run(source, outbound_move, ctx)?;
        let inbound = self
            .ensure_record(destination)
            .and_then(|_| self.run(destination, Movement::TransferIn { quantity, from }, ctx));
        match inbound {
            Ok(inbound) => Ok(Transfer { outbound, inbound }),
            Err(err) => {
                tracing::warn!(
                    source = %source,
                    destination = %destination,
                    error = %err,
                    "transfer inbound leg failed; reversing outbound leg"
                );
                let reversal = ctx.clone().with_notes(format!("reversal of failed transfer to {to}"));
                if let Err(undo) = self.run(source, Movement::TransferIn { quantity, from: to }, &reversal) {
                    tracing::error!(
                        source = %source,
                        error = %undo,
                        "failed to reverse transfer outbound leg"
                    );
                }
                Err(err)
            }
        }
    }

    /// Change the condition of the stock (recorded as a zero-delta adjustment).
    #[instrument(skip(self, ctx), fields(key = %key, status = %status), err)]
    pub fn set_status(
        &self,
        key: StockKey,
        status: StockStatus,
        reason: Option<&str>,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        self.run(
            key,
            Movement::ChangeStatus {
                status,
                reason: reason.map(str::to_string),
            },
            ctx,
        )
    }

    pub fn stock_record(&self, key: StockKey) -> LedgerResult<StockRecord> {
        self.store.get(key)
    }

    /// All records of a variant, in ascending key order.
    pub fn records_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
        self.store.list_for_variant(variant_id)
    }

    pub fn ledger(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
        self.store.get(key)?;
        self.store.entries(key)
    }

    /// Replay the ledger of `key` and check it against the stored counters.
    #[instrument(skip(self), fields(key = %key), err)]
    pub fn verify_ledger(&self, key: StockKey) -> LedgerResult<StockCounters> {
        let record = self.store.get(key)?;
        let entries = self.store.entries(key)?;
        stockledger_inventory::verify(&record, &entries)
    }

    fn ensure_record(&self, key: StockKey) -> LedgerResult<()> {
        match self.store.create(StockRecord::new(key, Utc::now())) {
            Ok(_) => {
                tracing::info!(key = %key, "stock record created for transfer destination");
                Ok(())
            }
            Err(LedgerError::InvalidState(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryInventoryStore;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use stockledger_core::UserId;
    use stockledger_inventory::TransactionType;

    fn test_engine() -> ReservationEngine<Arc<InMemoryInventoryStore>> {
        ReservationEngine::new(Arc::new(InMemoryInventoryStore::new()))
    }

    fn stocked<S: InventoryStore>(engine: &ReservationEngine<S>, on_hand: i64) -> StockKey {
        let key = StockKey::new(VariantId::new(), WarehouseId::new());
        engine
            .create_record(StockRecord::new(key, Utc::now()))
            .unwrap();
        if on_hand > 0 {
            engine
                .receipt(key, on_hand, None, None, &EntryContext::new())
                .unwrap();
        }
        key
    }

    fn ctx() -> EntryContext {
        EntryContext::new().with_reference("cart:7").by(UserId::new())
    }

    #[test]
    fn reserve_records_reference_and_actor() {
        let engine = test_engine();
        let key = stocked(&engine, 10);
        let ctx = ctx();

        let committed = engine.reserve(key, 3, &ctx).unwrap();
        assert_eq!(committed.record.reserved(), 3);
        assert_eq!(committed.entry.reference(), Some("cart:7"));
        assert_eq!(committed.entry.created_by(), ctx.actor);
        assert_eq!(committed.entry.quantity_delta(), -3);
    }

    #[test]
    fn zero_quantity_is_invalid_argument() {
        let engine = test_engine();
        let key = stocked(&engine, 10);
        for result in [
            engine.reserve(key, 0, &ctx()),
            engine.release(key, 0, &ctx()),
            engine.allocate(key, -2, &ctx()),
            engine.receipt(key, 0, None, None, &ctx()),
            engine.adjustment(key, 0, None, &ctx()),
        ] {
            assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
        }
        assert_eq!(engine.ledger(key).unwrap().len(), 1);
    }

    #[test]
    fn release_after_allocate_is_invalid_state() {
        let engine = test_engine();
        let key = stocked(&engine, 100);
        engine.reserve(key, 30, &ctx()).unwrap();
        engine.allocate(key, 30, &ctx()).unwrap();

        let err = engine.release(key, 30, &ctx()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));

        let record = engine.stock_record(key).unwrap();
        assert_eq!(record.reserved(), 0);
        assert_eq!(record.allocated(), 30);
    }

    #[test]
    fn double_release_fails_cleanly() {
        let engine = test_engine();
        let key = stocked(&engine, 5);
        engine.reserve(key, 2, &ctx()).unwrap();
        engine.release(key, 2, &ctx()).unwrap();

        let err = engine.release(key, 2, &ctx()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(engine.stock_record(key).unwrap().available(), 5);
    }

    #[test]
    fn adjustment_below_zero_is_invalid_state() {
        let engine = test_engine();
        let key = stocked(&engine, 100);

        let err = engine
            .adjustment(key, -150, Some("cycle count"), &ctx())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
        assert_eq!(engine.stock_record(key).unwrap().on_hand(), 100);
    }

    #[test]
    fn receipt_cost_gets_default_currency() {
        let engine = ReservationEngine::with_settings(
            Arc::new(InMemoryInventoryStore::new()),
            EngineSettings {
                default_currency: "EUR".to_string(),
            },
        );
        let key = stocked(&engine, 0);

        let with_cost = engine
            .receipt(key, 5, Some(1999), None, &ctx())
            .unwrap();
        assert_eq!(with_cost.entry.currency(), Some("EUR"));

        let without_cost = engine.receipt(key, 5, None, None, &ctx()).unwrap();
        assert_eq!(without_cost.entry.currency(), None);
    }

    #[test]
    fn set_status_blocks_new_reservations() {
        let engine = test_engine();
        let key = stocked(&engine, 10);

        let committed = engine
            .set_status(key, StockStatus::Quarantine, Some("supplier recall"), &ctx())
            .unwrap();
        assert_eq!(committed.entry.transaction_type(), TransactionType::Adjustment);
        assert_eq!(committed.entry.quantity_delta(), 0);
        assert_eq!(committed.entry.metadata()["status"], "QUARANTINE");

        let err = engine.reserve(key, 1, &ctx()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[test]
    fn sale_and_return_move_on_hand() {
        let engine = test_engine();
        let key = stocked(&engine, 10);
        engine.reserve(key, 4, &ctx()).unwrap();
        engine.allocate(key, 4, &ctx()).unwrap();
        engine.sale(key, 4, &ctx()).unwrap();
        let record = engine.return_stock(key, 1, &ctx()).unwrap().record;

        assert_eq!(record.on_hand(), 7);
        assert_eq!(record.allocated(), 0);
        assert_eq!(engine.verify_ledger(key).unwrap(), record.counters());
    }

    #[test]
    fn transfer_moves_available_stock_and_creates_destination() {
        let engine = test_engine();
        let source = stocked(&engine, 10);
        let to = WarehouseId::new();

        let transfer = engine
            .transfer(source.variant_id, source.warehouse_id, to, 4, &ctx())
            .unwrap();
        assert_eq!(transfer.outbound.record.on_hand(), 6);
        assert_eq!(transfer.inbound.record.on_hand(), 4);
        assert_eq!(transfer.inbound.entry.transaction_type(), TransactionType::TransferIn);

        let destination = StockKey::new(source.variant_id, to);
        engine.verify_ledger(source).unwrap();
        engine.verify_ledger(destination).unwrap();
    }

    #[test]
    fn transfer_rejects_same_warehouse_and_short_source() {
        let engine = test_engine();
        let source = stocked(&engine, 3);

        let err = engine
            .transfer(source.variant_id, source.warehouse_id, source.warehouse_id, 1, &ctx())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));

        let to = WarehouseId::new();
        let err = engine
            .transfer(source.variant_id, source.warehouse_id, to, 5, &ctx())
            .unwrap_err();
        assert!(err.is_insufficient_stock());
        assert_eq!(engine.stock_record(source).unwrap().on_hand(), 3);
        let destination = StockKey::new(source.variant_id, to);
        assert!(matches!(
            engine.stock_record(destination),
            Err(LedgerError::NotFound(_))
        ));

        let err = engine
            .transfer(VariantId::new(), WarehouseId::new(), to, 1, &ctx())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn unknown_key_is_not_found() {
        let engine = test_engine();
        let key = StockKey::new(VariantId::new(), WarehouseId::new());
        assert!(matches!(engine.reserve(key, 1, &ctx()), Err(LedgerError::NotFound(_))));
        assert!(matches!(engine.ledger(key), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn fifteen_concurrent_reserves_against_ten_units() {
        let engine = test_engine();
        let key = stocked(&engine, 10);
        let engine = Arc::new(engine);
        let barrier = Arc::new(Barrier::new(15));

        let handles: Vec<_> = (0..15)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let ctx = EntryContext::new().with_reference(format!("cart:{i}"));
                    barrier.wait();
                    engine.reserve(key, 1, &ctx)
                })
            })
            .collect();

        let results: Vec<LedgerResult<Committed>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { variant, .. }) if *variant == key.variant_id))
            .count();

        assert_eq!(successes, 10);
        assert_eq!(insufficient, 5);

        let record = engine.stock_record(key).unwrap();
        assert_eq!(record.reserved(), 10);
        assert_eq!(record.available(), 0);
        assert_eq!(engine.verify_ledger(key).unwrap(), record.counters());
    }
}
