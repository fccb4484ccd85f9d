//! Ledger replay: rebuild counters from the audit trail.

use stockledger_core::{LedgerError, LedgerResult};

use crate::ledger::LedgerEntry;
use crate::stock::{StockCounters, StockRecord};
use crate::transition::Movement;

/// Replay entries (in `created_at`, then `sequence` order) from zero counters.
///
/// Each step is checked against the snapshot stored on the entry; a mismatch
/// means the trail and the counters have diverged.
pub fn replay(entries: &[LedgerEntry]) -> LedgerResult<StockCounters> {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| (e.created_at(), e.sequence()));

    let mut counters = StockCounters::default();
    for entry in ordered {
        counters = Movement::from_entry(entry)?.apply_counters(counters, entry.variant_id())?;
        if counters != entry.resulting() {
            return Err(LedgerError::invalid_state(format!(
                "ledger entry {} (sequence {}) records {:?} but replay gives {:?}",
                entry.entry_id(),
                entry.sequence(),
                entry.resulting(),
                counters
            )));
        }
    }
    Ok(counters)
}

/// Check that `record` matches the replay of its ledger.
pub fn verify(record: &StockRecord, entries: &[LedgerEntry]) -> LedgerResult<StockCounters> {
    if let Some(foreign) = entries.iter().find(|e| e.key() != record.key()) {
        return Err(LedgerError::invalid_argument(format!(
            "entry {} belongs to {}, not {}",
            foreign.entry_id(),
            foreign.key(),
            record.key()
        )));
    }
    let counters = replay(entries)?;
    if counters != record.counters() {
        return Err(LedgerError::invalid_state(format!(
            "record {} holds {:?} but its ledger replays to {:?}",
            record.key(),
            record.counters(),
            counters
        )));
    }
    Ok(counters)
}
