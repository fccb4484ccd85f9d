//! Inventory ledger domain.
//!
//! Pure, deterministic rules for per-(variant, warehouse) stock counters and
//! their immutable audit trail. No IO, no locking: stores in `stockledger-infra`
//! serialize access and persist what [`Movement::apply`] decides.

pub mod ledger;
pub mod replay;
pub mod stock;
pub mod transition;

pub use ledger::{
    DocumentRef, EntryDraft, LedgerEntry, LedgerEntrySnapshot, LedgerLog, TransactionType,
};
pub use replay::{replay, verify};
pub use stock::{LotInfo, StockCounters, StockKey, StockRecord, StockRecordSnapshot, StockStatus};
pub use transition::{EntryContext, Movement, Mutation};
