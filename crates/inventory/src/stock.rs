use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use stockledger_core::{Entity, LedgerError, LedgerResult, VariantId, WarehouseId};

/// Identity of a stock record: one variant stocked in one warehouse.
///
/// Ordered by variant, then warehouse. Multi-record operations lock keys in
/// this order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(variant_id: VariantId, warehouse_id: WarehouseId) -> Self {
        Self {
            variant_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.variant_id, self.warehouse_id)
    }
}

/// Physical condition of the stock held in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    Available,
    OnHold,
    Damaged,
    ExpiringSoon,
    Expired,
    Quarantine,
    Returned,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Available => "AVAILABLE",
            StockStatus::OnHold => "ON_HOLD",
            StockStatus::Damaged => "DAMAGED",
            StockStatus::ExpiringSoon => "EXPIRING_SOON",
            StockStatus::Expired => "EXPIRED",
            StockStatus::Quarantine => "QUARANTINE",
            StockStatus::Returned => "RETURNED",
        }
    }

    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "AVAILABLE" => Ok(StockStatus::Available),
            "ON_HOLD" => Ok(StockStatus::OnHold),
            "DAMAGED" => Ok(StockStatus::Damaged),
            "EXPIRING_SOON" => Ok(StockStatus::ExpiringSoon),
            "EXPIRED" => Ok(StockStatus::Expired),
            "QUARANTINE" => Ok(StockStatus::Quarantine),
            "RETURNED" => Ok(StockStatus::Returned),
            other => Err(LedgerError::invalid_argument(format!(
                "unknown stock status '{other}'"
            ))),
        }
    }

    /// Only AVAILABLE stock may be offered for new reservations.
    pub fn is_sellable(&self) -> bool {
        matches!(self, StockStatus::Available)
    }
}

impl core::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional lot / batch / expiry tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotInfo {
    pub lot: Option<String>,
    pub batch_number: Option<String>,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

/// The three counters the ledger moves.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockCounters {
    pub on_hand: i64,
    pub reserved: i64,
    pub allocated: i64,
}

impl StockCounters {
    /// Available to sell: `max(0, on_hand - reserved - allocated)`.
    pub fn available(&self) -> i64 {
        (self.on_hand - self.reserved - self.allocated).max(0)
    }

    pub fn ensure_non_negative(&self) -> LedgerResult<()> {
        if self.on_hand < 0 || self.reserved < 0 || self.allocated < 0 {
            return Err(LedgerError::invalid_state(format!(
                "counters cannot go negative (on_hand={}, reserved={}, allocated={})",
                self.on_hand, self.reserved, self.allocated
            )));
        }
        Ok(())
    }
}

/// Per (variant, warehouse) stock counters.
///
/// Counters are private: they only move through [`crate::Movement`], so every
/// change is paired with a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    key: StockKey,
    counters: StockCounters,
    incoming: i64,
    safety_stock: i64,
    status: StockStatus,
    lot: LotInfo,
    uom: String,
    metadata: Map<String, JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// A freshly stocked record: all counters zero, status AVAILABLE.
    pub fn new(key: StockKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            counters: StockCounters::default(),
            incoming: 0,
            safety_stock: 0,
            status: StockStatus::Available,
            lot: LotInfo::default(),
            uom: "pcs".to_string(),
            metadata: Map::new(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_status(mut self, status: StockStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_safety_stock(mut self, safety_stock: i64) -> Self {
        self.safety_stock = safety_stock;
        self
    }

    /// Units expected from open purchase orders (informational).
    pub fn with_incoming(mut self, incoming: i64) -> Self {
        self.incoming = incoming;
        self
    }

    pub fn with_lot(mut self, lot: LotInfo) -> Self {
        self.lot = lot;
        self
    }

    pub fn with_uom(mut self, uom: impl Into<String>) -> Self {
        self.uom = uom.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Rebuild a record read back from durable storage.
    pub fn rehydrate(snapshot: StockRecordSnapshot) -> LedgerResult<Self> {
        let record = Self {
            key: snapshot.key,
            counters: snapshot.counters,
            incoming: snapshot.incoming,
            safety_stock: snapshot.safety_stock,
            status: snapshot.status,
            lot: snapshot.lot,
            uom: snapshot.uom,
            metadata: snapshot.metadata,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        };
        record.counters.ensure_non_negative()?;
        Ok(record)
    }

    /// Checks a record handed in for creation.
    pub fn validate_new(&self) -> LedgerResult<()> {
        if self.counters != StockCounters::default() {
            return Err(LedgerError::invalid_argument(
                "new stock records start with zero counters; use a receipt to add stock",
            ));
        }
        if self.incoming < 0 {
            return Err(LedgerError::invalid_argument("incoming cannot be negative"));
        }
        if self.safety_stock < 0 {
            return Err(LedgerError::invalid_argument("safety_stock cannot be negative"));
        }
        if self.uom.trim().is_empty() {
            return Err(LedgerError::invalid_argument("uom cannot be empty"));
        }
        Ok(())
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn variant_id(&self) -> VariantId {
        self.key.variant_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.key.warehouse_id
    }

    pub fn counters(&self) -> StockCounters {
        self.counters
    }

    pub fn on_hand(&self) -> i64 {
        self.counters.on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.counters.reserved
    }

    pub fn allocated(&self) -> i64 {
        self.counters.allocated
    }

    pub fn available(&self) -> i64 {
        self.counters.available()
    }

    pub fn incoming(&self) -> i64 {
        self.incoming
    }

    pub fn safety_stock(&self) -> i64 {
        self.safety_stock
    }

    pub fn status(&self) -> StockStatus {
        self.status
    }

    pub fn lot(&self) -> &LotInfo {
        &self.lot
    }

    pub fn uom(&self) -> &str {
        &self.uom
    }

    pub fn metadata(&self) -> &Map<String, JsonValue> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_sellable(&self) -> bool {
        self.status.is_sellable()
    }

    /// Reporting only; safety stock never gates a reservation.
    pub fn is_below_safety_stock(&self) -> bool {
        self.available() < self.safety_stock
    }

    pub fn snapshot(&self) -> StockRecordSnapshot {
        StockRecordSnapshot {
            key: self.key,
            counters: self.counters,
            incoming: self.incoming,
            safety_stock: self.safety_stock,
            status: self.status,
            lot: self.lot.clone(),
            uom: self.uom.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn set_counters(&mut self, counters: StockCounters, at: DateTime<Utc>) {
        self.counters = counters;
        self.updated_at = at;
    }

    pub(crate) fn set_status(&mut self, status: StockStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
    }
}

impl Entity for StockRecord {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}

/// Plain field view of a record, used at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecordSnapshot {
    pub key: StockKey,
    pub counters: StockCounters,
    pub incoming: i64,
    pub safety_stock: i64,
    pub status: StockStatus,
    pub lot: LotInfo,
    pub uom: String,
    pub metadata: Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
