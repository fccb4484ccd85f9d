//! Immutable audit trail of counter-affecting operations.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use stockledger_core::{
    Entity, LedgerEntryId, LedgerError, LedgerResult, OrderId, UserId, VariantId, WarehouseId,
};
use stockledger_events::Event;

use crate::stock::{StockCounters, StockKey, StockRecord};

/// Kind of movement recorded by a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Receipt,
    Sale,
    Adjustment,
    Allocation,
    Unallocation,
    Reservation,
    Release,
    TransferIn,
    TransferOut,
    Return,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receipt => "receipt",
            TransactionType::Sale => "sale",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Allocation => "allocation",
            TransactionType::Unallocation => "unallocation",
            TransactionType::Reservation => "reservation",
            TransactionType::Release => "release",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::TransferOut => "transfer_out",
            TransactionType::Return => "return",
        }
    }

    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "receipt" => Ok(TransactionType::Receipt),
            "sale" => Ok(TransactionType::Sale),
            "adjustment" => Ok(TransactionType::Adjustment),
            "allocation" => Ok(TransactionType::Allocation),
            "unallocation" => Ok(TransactionType::Unallocation),
            "reservation" => Ok(TransactionType::Reservation),
            "release" => Ok(TransactionType::Release),
            "transfer_in" => Ok(TransactionType::TransferIn),
            "transfer_out" => Ok(TransactionType::TransferOut),
            "return" => Ok(TransactionType::Return),
            other => Err(LedgerError::invalid_argument(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            TransactionType::Receipt => "inventory.ledger.receipt",
            TransactionType::Sale => "inventory.ledger.sale",
            TransactionType::Adjustment => "inventory.ledger.adjustment",
            TransactionType::Allocation => "inventory.ledger.allocation",
            TransactionType::Unallocation => "inventory.ledger.unallocation",
            TransactionType::Reservation => "inventory.ledger.reservation",
            TransactionType::Release => "inventory.ledger.release",
            TransactionType::TransferIn => "inventory.ledger.transfer_in",
            TransactionType::TransferOut => "inventory.ledger.transfer_out",
            TransactionType::Return => "inventory.ledger.return",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business document an entry was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DocumentRef {
    Order(OrderId),
    Shipment(Uuid),
    Return(Uuid),
}

/// An entry as decided by a movement, before the store stamps identity,
/// sequence, and time on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub quantity_delta: i64,
    /// Unit cost in the smallest currency unit (e.g. cents).
    pub cost_price: Option<i64>,
    pub currency: Option<String>,
    pub document: Option<DocumentRef>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub metadata: Map<String, JsonValue>,
    pub created_by: Option<UserId>,
}

/// Immutable ledger entry.
///
/// Carries a snapshot of the counters right after the movement, so any record
/// state can be audited (and reconstructed) from the trail alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: LedgerEntryId,
    variant_id: VariantId,
    warehouse_id: WarehouseId,
    /// Position in the per-record ledger, starting at 1.
    sequence: u64,
    transaction_type: TransactionType,
    quantity: i64,
    quantity_delta: i64,
    resulting_on_hand: i64,
    resulting_reserved: i64,
    resulting_allocated: i64,
    cost_price: Option<i64>,
    currency: Option<String>,
    document: Option<DocumentRef>,
    reference: Option<String>,
    notes: Option<String>,
    metadata: Map<String, JsonValue>,
    created_by: Option<UserId>,
    created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Stamp a draft against the record state it produced.
    pub fn commit(
        id: LedgerEntryId,
        draft: EntryDraft,
        record: &StockRecord,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        let counters = record.counters();
        Self {
            id,
            variant_id: record.variant_id(),
            warehouse_id: record.warehouse_id(),
            sequence,
            transaction_type: draft.transaction_type,
            quantity: draft.quantity,
            quantity_delta: draft.quantity_delta,
            resulting_on_hand: counters.on_hand,
            resulting_reserved: counters.reserved,
            resulting_allocated: counters.allocated,
            cost_price: draft.cost_price,
            currency: draft.currency,
            document: draft.document,
            reference: draft.reference,
            notes: draft.notes,
            metadata: draft.metadata,
            created_by: draft.created_by,
            created_at,
        }
    }

    /// Rebuild an entry read back from storage.
    pub fn rehydrate(snapshot: LedgerEntrySnapshot) -> LedgerResult<Self> {
        if snapshot.sequence == 0 {
            return Err(LedgerError::invalid_state("ledger sequence starts at 1"));
        }
        if snapshot.quantity < 0 {
            return Err(LedgerError::invalid_state(format!(
                "ledger entry {} has negative quantity",
                snapshot.id
            )));
        }
        snapshot.resulting.ensure_non_negative()?;
        Ok(Self {
            id: snapshot.id,
            variant_id: snapshot.key.variant_id,
            warehouse_id: snapshot.key.warehouse_id,
            sequence: snapshot.sequence,
            transaction_type: snapshot.transaction_type,
            quantity: snapshot.quantity,
            quantity_delta: snapshot.quantity_delta,
            resulting_on_hand: snapshot.resulting.on_hand,
            resulting_reserved: snapshot.resulting.reserved,
            resulting_allocated: snapshot.resulting.allocated,
            cost_price: snapshot.cost_price,
            currency: snapshot.currency,
            document: snapshot.document,
            reference: snapshot.reference,
            notes: snapshot.notes,
            metadata: snapshot.metadata,
            created_by: snapshot.created_by,
            created_at: snapshot.created_at,
        })
    }

    pub fn entry_id(&self) -> LedgerEntryId {
        self.id
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.variant_id, self.warehouse_id)
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn quantity_delta(&self) -> i64 {
        self.quantity_delta
    }

    pub fn resulting(&self) -> StockCounters {
        StockCounters {
            on_hand: self.resulting_on_hand,
            reserved: self.resulting_reserved,
            allocated: self.resulting_allocated,
        }
    }

    pub fn cost_price(&self) -> Option<i64> {
        self.cost_price
    }

    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    pub fn document(&self) -> Option<DocumentRef> {
        self.document
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, JsonValue> {
        &self.metadata
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Event for LedgerEntry {
    fn event_type(&self) -> &'static str {
        self.transaction_type.event_type()
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Plain field view of an entry, used at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntrySnapshot {
    pub id: LedgerEntryId,
    pub key: StockKey,
    pub sequence: u64,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub quantity_delta: i64,
    pub resulting: StockCounters,
    pub cost_price: Option<i64>,
    pub currency: Option<String>,
    pub document: Option<DocumentRef>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub metadata: Map<String, JsonValue>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Append-only ledger for a single stock record.
///
/// There is no way to get a mutable reference to a stored entry. Appending an
/// entry whose id or sequence was already written is rejected with
/// `ImmutableRecordViolation`.
#[derive(Debug, Clone, Default)]
pub struct LedgerLog {
    entries: Vec<LedgerEntry>,
    ids: HashSet<LedgerEntryId>,
}

impl LedgerLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence + 1).unwrap_or(1)
    }

    /// Latest timestamp written; new entries never go back in time.
    pub fn last_created_at(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.created_at)
    }

    /// Check that `entry` could be appended, without appending it.
    pub fn check_append(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        if self.ids.contains(&entry.id) {
            return Err(LedgerError::immutable(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
        if let Some(first) = self.entries.first() {
            if first.key() != entry.key() {
                return Err(LedgerError::invalid_argument(format!(
                    "entry for {} appended to ledger of {}",
                    entry.key(),
                    first.key()
                )));
            }
        }
        let expected = self.next_sequence();
        if entry.sequence < expected {
            return Err(LedgerError::immutable(format!(
                "ledger sequence {} of {} is already written",
                entry.sequence,
                entry.key()
            )));
        }
        if entry.sequence != expected {
            return Err(LedgerError::invalid_state(format!(
                "ledger gap for {}: expected sequence {expected}, got {}",
                entry.key(),
                entry.sequence
            )));
        }
        if let Some(last) = self.last_created_at() {
            if entry.created_at < last {
                return Err(LedgerError::invalid_state(
                    "ledger entries must be appended in created_at order",
                ));
            }
        }
        Ok(())
    }

    pub fn append(&mut self, entry: LedgerEntry) -> LedgerResult<&LedgerEntry> {
        self.check_append(&entry)?;
        self.ids.insert(entry.id);
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
