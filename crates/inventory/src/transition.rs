//! Counter transitions.
//!
//! A [`Movement`] is the only way stock counters change. Applying one to a
//! record is pure: it returns the next record together with the ledger entry
//! draft describing the change, or an error and nothing at all.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use stockledger_core::{LedgerError, LedgerResult, UserId, VariantId, WarehouseId};

use crate::ledger::{DocumentRef, EntryDraft, LedgerEntry, TransactionType};
use crate::stock::{StockCounters, StockRecord, StockStatus};

const STATUS_KEY: &str = "status";
const PREVIOUS_STATUS_KEY: &str = "previous_status";
const COUNTERPART_KEY: &str = "counterpart_warehouse";

/// Caller-supplied context recorded on the ledger entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryContext {
    pub reference: Option<String>,
    pub document: Option<DocumentRef>,
    pub actor: Option<UserId>,
    pub notes: Option<String>,
    pub metadata: Map<String, JsonValue>,
}

impl EntryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = Some(document);
        self
    }

    pub fn by(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A requested change to one stock record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Movement {
    Reserve {
        quantity: i64,
    },
    Release {
        quantity: i64,
    },
    Allocate {
        quantity: i64,
    },
    Unallocate {
        quantity: i64,
    },
    Receipt {
        quantity: i64,
        /// Unit cost in minor units.
        cost_price: Option<i64>,
        currency: Option<String>,
    },
    Adjust {
        delta: i64,
        reason: Option<String>,
    },
    Sale {
        quantity: i64,
    },
    Return {
        quantity: i64,
    },
    TransferOut {
        quantity: i64,
        to: WarehouseId,
    },
    TransferIn {
        quantity: i64,
        from: WarehouseId,
    },
    ChangeStatus {
        status: StockStatus,
        reason: Option<String>,
    },
}

/// Result of applying a movement: the next record state and the entry that
/// must be committed with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub record: StockRecord,
    pub draft: EntryDraft,
}

impl Movement {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Movement::Reserve { .. } => TransactionType::Reservation,
            Movement::Release { .. } => TransactionType::Release,
            Movement::Allocate { .. } => TransactionType::Allocation,
            Movement::Unallocate { .. } => TransactionType::Unallocation,
            Movement::Receipt { .. } => TransactionType::Receipt,
            Movement::Adjust { .. } | Movement::ChangeStatus { .. } => TransactionType::Adjustment,
            Movement::Sale { .. } => TransactionType::Sale,
            Movement::Return { .. } => TransactionType::Return,
            Movement::TransferOut { .. } => TransactionType::TransferOut,
            Movement::TransferIn { .. } => TransactionType::TransferIn,
        }
    }

    /// Unsigned magnitude recorded on the entry.
    pub fn quantity(&self) -> i64 {
        match self {
            Movement::Reserve { quantity }
            | Movement::Release { quantity }
            | Movement::Allocate { quantity }
            | Movement::Unallocate { quantity }
            | Movement::Receipt { quantity, .. }
            | Movement::Sale { quantity }
            | Movement::Return { quantity }
            | Movement::TransferOut { quantity, .. }
            | Movement::TransferIn { quantity, .. } => *quantity,
            Movement::Adjust { delta, .. } => delta.saturating_abs(),
            Movement::ChangeStatus { .. } => 0,
        }
    }

    /// Signed change to `on_hand` (reservations report `-q`, releases `+q`).
    pub fn quantity_delta(&self) -> i64 {
        match self {
            Movement::Reserve { quantity }
            | Movement::Sale { quantity }
            | Movement::TransferOut { quantity, .. } => -quantity,
            Movement::Release { quantity }
            | Movement::Receipt { quantity, .. }
            | Movement::Return { quantity }
            | Movement::TransferIn { quantity, .. } => *quantity,
            Movement::Allocate { .. }
            | Movement::Unallocate { .. }
            | Movement::ChangeStatus { .. } => 0,
            Movement::Adjust { delta, .. } => *delta,
        }
    }

    /// Argument checks that do not depend on record state.
    pub fn validate(&self) -> LedgerResult<()> {
        match self {
            Movement::Adjust { delta, .. } => {
                if *delta == 0 {
                    return Err(LedgerError::invalid_argument(
                        "adjustment delta must be non-zero",
                    ));
                }
            }
            Movement::ChangeStatus { .. } => {}
            other => {
                let quantity = other.quantity();
                if quantity <= 0 {
                    return Err(LedgerError::invalid_argument(format!(
                        "quantity must be positive, got {quantity}"
                    )));
                }
            }
        }

        if let Movement::Receipt {
            cost_price,
            currency,
            ..
        } = self
        {
            if matches!(cost_price, Some(c) if *c < 0) {
                return Err(LedgerError::invalid_argument(
                    "cost price cannot be negative",
                ));
            }
            if let Some(code) = currency {
                if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(LedgerError::invalid_argument(format!(
                        "currency must be a 3-letter ISO code, got '{code}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Counter arithmetic for this movement.
    ///
    /// Used both for live transitions and for ledger replay, so the two can
    /// never disagree.
    pub fn apply_counters(
        &self,
        counters: StockCounters,
        variant: VariantId,
    ) -> LedgerResult<StockCounters> {
        self.validate()?;
        let mut next = counters;
        match self {
            Movement::Reserve { quantity } => {
                let available = counters.available();
                if available < *quantity {
                    return Err(LedgerError::insufficient_stock(variant, *quantity, available));
                }
                next.reserved = add(counters.reserved, *quantity)?;
            }
            Movement::Release { quantity } => {
                require(counters.reserved, *quantity, "release", "reserved")?;
                next.reserved = counters.reserved - quantity;
            }
            Movement::Allocate { quantity } => {
                require(counters.reserved, *quantity, "allocate", "reserved")?;
                next.reserved = counters.reserved - quantity;
                next.allocated = add(counters.allocated, *quantity)?;
            }
            Movement::Unallocate { quantity } => {
                require(counters.allocated, *quantity, "unallocate", "allocated")?;
                next.allocated = counters.allocated - quantity;
                next.reserved = add(counters.reserved, *quantity)?;
            }
            Movement::Sale { quantity } => {
                require(counters.allocated, *quantity, "sell", "allocated")?;
                next.allocated = counters.allocated - quantity;
                next.on_hand = counters.on_hand - quantity;
            }
            Movement::TransferOut { quantity, .. } => {
                let available = counters.available();
                if available < *quantity {
                    return Err(LedgerError::insufficient_stock(variant, *quantity, available));
                }
                next.on_hand = counters.on_hand - quantity;
            }
            Movement::Receipt { quantity, .. }
            | Movement::Return { quantity }
            | Movement::TransferIn { quantity, .. } => {
                next.on_hand = add(counters.on_hand, *quantity)?;
            }
            Movement::Adjust { delta, .. } => {
                let on_hand = add(counters.on_hand, *delta)?;
                let committed = counters.reserved + counters.allocated;
                if on_hand < committed {
                    return Err(LedgerError::invalid_state(format!(
                        "adjustment of {delta} would leave on_hand {on_hand} below committed stock {committed}"
                    )));
                }
                next.on_hand = on_hand;
            }
            Movement::ChangeStatus { .. } => {}
        }
        next.ensure_non_negative()?;
        Ok(next)
    }

    /// Apply this movement to `record`.
    ///
    /// Returns the next record and the entry draft; `record` itself is left
    /// untouched, so a failed movement has no effect at all.
    pub fn apply(
        &self,
        record: &StockRecord,
        ctx: &EntryContext,
        at: DateTime<Utc>,
    ) -> LedgerResult<Mutation> {
        if let Movement::Reserve { .. } = self {
            if record.status() != StockStatus::Available {
                return Err(LedgerError::invalid_state(format!(
                    "cannot reserve {} while stock is {}",
                    record.key(),
                    record.status()
                )));
            }
        }
        if let Movement::TransferOut { to: other, .. } | Movement::TransferIn { from: other, .. } =
            self
        {
            if *other == record.warehouse_id() {
                return Err(LedgerError::invalid_argument(
                    "transfer source and destination must differ",
                ));
            }
        }

        let counters = self.apply_counters(record.counters(), record.variant_id())?;
        let mut next = record.clone();
        next.set_counters(counters, at);

        let mut metadata = ctx.metadata.clone();
        let mut notes = ctx.notes.clone();
        let (mut cost_price, mut currency) = (None, None);

        match self {
            Movement::Receipt {
                cost_price: c,
                currency: cur,
                ..
            } => {
                cost_price = *c;
                currency = cur.as_ref().map(|s| s.to_ascii_uppercase());
            }
            Movement::Adjust { reason, .. } => {
                if notes.is_none() {
                    notes = reason.clone();
                }
            }
            Movement::ChangeStatus { status, reason } => {
                if *status == record.status() {
                    return Err(LedgerError::invalid_state(format!(
                        "stock {} is already {status}",
                        record.key()
                    )));
                }
                metadata.insert(STATUS_KEY.to_string(), JsonValue::from(status.as_str()));
                metadata.insert(
                    PREVIOUS_STATUS_KEY.to_string(),
                    JsonValue::from(record.status().as_str()),
                );
                if notes.is_none() {
                    notes = reason.clone();
                }
                next.set_status(*status, at);
            }
            Movement::TransferOut { to: other, .. } | Movement::TransferIn { from: other, .. } => {
                metadata.insert(
                    COUNTERPART_KEY.to_string(),
                    JsonValue::from(other.to_string()),
                );
            }
            _ => {}
        }

        Ok(Mutation {
            record: next,
            draft: EntryDraft {
                transaction_type: self.transaction_type(),
                quantity: self.quantity(),
                quantity_delta: self.quantity_delta(),
                cost_price,
                currency,
                document: ctx.document,
                reference: ctx.reference.clone(),
                notes,
                metadata,
                created_by: ctx.actor,
            },
        })
    }

    /// Rebuild the movement a committed entry was produced by.
    pub fn from_entry(entry: &LedgerEntry) -> LedgerResult<Self> {
        let quantity = entry.quantity();
        let movement = match entry.transaction_type() {
            TransactionType::Reservation => Movement::Reserve { quantity },
            TransactionType::Release => Movement::Release { quantity },
            TransactionType::Allocation => Movement::Allocate { quantity },
            TransactionType::Unallocation => Movement::Unallocate { quantity },
            TransactionType::Sale => Movement::Sale { quantity },
            TransactionType::Return => Movement::Return { quantity },
            TransactionType::Receipt => Movement::Receipt {
                quantity,
                cost_price: entry.cost_price(),
                currency: entry.currency().map(str::to_string),
            },
            TransactionType::TransferOut => Movement::TransferOut {
                quantity,
                to: counterpart(entry)?,
            },
            TransactionType::TransferIn => Movement::TransferIn {
                quantity,
                from: counterpart(entry)?,
            },
            TransactionType::Adjustment => match entry.metadata().get(STATUS_KEY) {
                Some(status) if entry.quantity_delta() == 0 => Movement::ChangeStatus {
                    status: StockStatus::parse(status.as_str().unwrap_or_default())?,
                    reason: entry.notes().map(str::to_string),
                },
                _ => Movement::Adjust {
                    delta: entry.quantity_delta(),
                    reason: entry.notes().map(str::to_string),
                },
            },
        };
        Ok(movement)
    }
}

fn add(a: i64, b: i64) -> LedgerResult<i64> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::invalid_argument("quantity overflow"))
}

fn require(have: i64, want: i64, action: &str, counter: &str) -> LedgerResult<()> {
    if have < want {
        return Err(LedgerError::invalid_state(format!(
            "cannot {action} {want}: only {have} {counter}"
        )));
    }
    Ok(())
}

fn counterpart(entry: &LedgerEntry) -> LedgerResult<WarehouseId> {
    entry
        .metadata()
        .get(COUNTERPART_KEY)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| {
            LedgerError::invalid_state(format!(
                "transfer entry {} has no counterpart warehouse",
                entry.entry_id()
            ))
        })?
        .parse()
}
