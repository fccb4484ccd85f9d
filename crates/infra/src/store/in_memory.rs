use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use stockledger_core::{LedgerEntryId, LedgerError, LedgerResult, VariantId};
use stockledger_inventory::{EntryContext, LedgerEntry, LedgerLog, Movement, StockKey, StockRecord};

use super::{Committed, InventoryStore, apply_movement, commit_time};

#[derive(Debug)]
struct Slot {
    record: StockRecord,
    ledger: LedgerLog,
}

/// In-memory store with one mutex per stock record.
///
/// The outer map lock is only held to find or insert a slot; counters are
/// mutated under the slot's own mutex, so different keys never contend.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    slots: RwLock<HashMap<StockKey, Arc<Mutex<Slot>>>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: StockKey) -> LedgerResult<Arc<Mutex<Slot>>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| LedgerError::storage("stock map lock poisoned"))?;
        slots
            .get(&key)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(format!("stock record {key}")))
    }
}

fn poisoned(key: StockKey) -> LedgerError {
    LedgerError::storage(format!("lock for {key} poisoned"))
}

impl InventoryStore for InMemoryInventoryStore {
    fn create(&self, record: StockRecord) -> LedgerResult<StockRecord> {
        record.validate_new()?;
        let key = record.key();

        let mut slots = self
            .slots
            .write()
            .map_err(|_| LedgerError::storage("stock map lock poisoned"))?;
        if slots.contains_key(&key) {
            return Err(LedgerError::invalid_state(format!(
                "stock record {key} already exists"
            )));
        }
        slots.insert(
            key,
            Arc::new(Mutex::new(Slot {
                record: record.clone(),
                ledger: LedgerLog::new(),
            })),
        );
        Ok(record)
    }

    fn get(&self, key: StockKey) -> LedgerResult<StockRecord> {
        let slot = self.slot(key)?;
        let guard = slot.lock().map_err(|_| poisoned(key))?;
        Ok(guard.record.clone())
    }

    fn list_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
        let mut matching: Vec<(StockKey, Arc<Mutex<Slot>>)> = {
            let slots = self
                .slots
                .read()
                .map_err(|_| LedgerError::storage("stock map lock poisoned"))?;
            slots
                .iter()
                .filter(|(k, _)| k.variant_id == variant_id)
                .map(|(k, s)| (*k, Arc::clone(s)))
                .collect()
        };
        matching.sort_by_key(|(k, _)| *k);

        let mut records = Vec::with_capacity(matching.len());
        for (key, slot) in matching {
            let guard = slot.lock().map_err(|_| poisoned(key))?;
            records.push(guard.record.clone());
        }
        Ok(records)
    }

    fn with_lock(
        &self,
        key: StockKey,
        movement: &Movement,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        let slot = self.slot(key)?;
        let mut guard = slot.lock().map_err(|_| poisoned(key))?;
        let slot = &mut *guard;

        let at = commit_time(slot.ledger.last_created_at().max(Some(slot.record.updated_at())));
        let mutation = apply_movement(key, &slot.record, movement, ctx, at)?;

        let entry = LedgerEntry::commit(
            LedgerEntryId::new(),
            mutation.draft,
            &mutation.record,
            slot.ledger.next_sequence(),
            at,
        );
        // Append first: if the ledger rejects the entry the counters stay put.
        slot.ledger.append(entry.clone())?;
        slot.record = mutation.record;

        Ok(Committed {
            record: slot.record.clone(),
            entry,
        })
    }

    fn entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
        let slot = self.slot(key)?;
        let guard = slot.lock().map_err(|_| poisoned(key))?;
        Ok(guard.ledger.entries().to_vec())
    }
}
