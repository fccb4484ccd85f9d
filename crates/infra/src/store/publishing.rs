use serde_json::Value as JsonValue;

use stockledger_core::{LedgerResult, VariantId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{EntryContext, LedgerEntry, Movement, StockKey, StockRecord};

use super::{Committed, InventoryStore};

/// Adapter that publishes committed ledger entries to an `EventBus`.
///
/// Ordering invariant: **publish happens only after the commit succeeds**. A
/// failed publish is logged and does not undo or fail the commit; consumers
/// catch up from `entries()`.
pub struct PublishingInventoryStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingInventoryStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

/// Envelope for a committed entry. The stream is the stock key; the sequence
/// number is the entry's ledger sequence.
pub fn entry_envelope(entry: &LedgerEntry) -> serde_json::Result<EventEnvelope<JsonValue>> {
    EventEnvelope::from_typed(
        *entry.entry_id().as_uuid(),
        entry.key().to_string(),
        entry.sequence(),
        entry,
    )
}

impl<S, B> InventoryStore for PublishingInventoryStore<S, B>
where
    S: InventoryStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn create(&self, record: StockRecord) -> LedgerResult<StockRecord> {
        self.store.create(record)
    }

    fn get(&self, key: StockKey) -> LedgerResult<StockRecord> {
        self.store.get(key)
    }

    fn list_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
        self.store.list_for_variant(variant_id)
    }

    fn with_lock(
        &self,
        key: StockKey,
        movement: &Movement,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        // 1) Commit (durable step)
        let committed = self.store.with_lock(key, movement, ctx)?;

        // 2) Publish (best-effort; at-least-once via re-reading the ledger)
        match entry_envelope(&committed.entry) {
            Ok(envelope) => {
                if let Err(err) = self.bus.publish(envelope) {
                    tracing::error!(
                        key = %key,
                        sequence = committed.entry.sequence(),
                        error = ?err,
                        "failed to publish ledger entry"
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    key = %key,
                    sequence = committed.entry.sequence(),
                    error = %err,
                    "failed to encode ledger entry"
                );
            }
        }

        Ok(committed)
    }

    fn entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
        self.store.entries(key)
    }
}
