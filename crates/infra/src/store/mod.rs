//! Stock record storage boundary.
//!
//! The store is the exclusive owner of [`StockRecord`] state. All mutation goes
//! through [`InventoryStore::with_lock`], which serializes access per key,
//! applies one [`Movement`] to the locked record, and commits the new counters
//! together with exactly one ledger entry.

pub mod in_memory;
pub mod postgres;
pub mod publishing;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use stockledger_core::{LedgerError, LedgerResult, VariantId};
use stockledger_inventory::{EntryContext, LedgerEntry, Movement, Mutation, StockKey, StockRecord};

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use publishing::PublishingInventoryStore;

/// What a successful `with_lock` committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub record: StockRecord,
    pub entry: LedgerEntry,
}

/// Per-record locked storage for stock counters and their ledger.
///
/// Implementations must:
/// - lock exactly one key per `with_lock` (never the whole table)
/// - never interleave two `with_lock` calls for the same key
/// - persist the counters and the ledger entry atomically
/// - assign per-key ledger sequences 1, 2, 3, ... in lock acquisition order
/// - never hand out commit timestamps earlier than the key's last entry
pub trait InventoryStore: Send + Sync {
    /// Insert a freshly stocked record. Fails with `InvalidState` if the key exists.
    fn create(&self, record: StockRecord) -> LedgerResult<StockRecord>;

    /// Current record for `key`, or `NotFound`.
    fn get(&self, key: StockKey) -> LedgerResult<StockRecord>;

    /// All records of a variant, in ascending key order.
    fn list_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>>;

    /// Apply `movement` to `key` under its exclusive lock and commit the result.
    ///
    /// A movement the record cannot take returns its error and writes nothing.
    fn with_lock(
        &self,
        key: StockKey,
        movement: &Movement,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed>;

    /// Ledger of `key` in sequence order (empty if the key has no entries).
    fn entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn create(&self, record: StockRecord) -> LedgerResult<StockRecord> {
        (**self).create(record)
    }

    fn get(&self, key: StockKey) -> LedgerResult<StockRecord> {
        (**self).get(key)
    }

    fn list_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
        (**self).list_for_variant(variant_id)
    }

    fn with_lock(
        &self,
        key: StockKey,
        movement: &Movement,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        (**self).with_lock(key, movement, ctx)
    }

    fn entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
        (**self).entries(key)
    }
}

/// Run `movement` against the locked `current` record.
///
/// Every backend commits only what this returns.
pub(crate) fn apply_movement(
    key: StockKey,
    current: &StockRecord,
    movement: &Movement,
    ctx: &EntryContext,
    at: DateTime<Utc>,
) -> LedgerResult<Mutation> {
    if current.key() != key {
        return Err(LedgerError::invalid_state(format!(
            "locked {key} but loaded {}",
            current.key()
        )));
    }
    let mutation = movement.apply(current, ctx, at)?;
    mutation.record.counters().ensure_non_negative()?;
    Ok(mutation)
}

/// Commit time for the next entry of a key: now, but never before its last entry.
pub(crate) fn commit_time(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}
