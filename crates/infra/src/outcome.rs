//! Serializable result shape for outer layers (HTTP handlers, admin tools).

use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult};
use stockledger_inventory::{LedgerEntry, StockRecord};

use crate::store::Committed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<StockRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry: Option<LedgerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// HTTP status an outer layer should answer with.
    pub status: u16,
}

impl OperationOutcome {
    pub fn success(record: &StockRecord, entry: Option<&LedgerEntry>) -> Self {
        Self {
            ok: true,
            record: Some(record.clone()),
            ledger_entry: entry.cloned(),
            error_kind: None,
            message: None,
            status: 200,
        }
    }

    pub fn failure(err: &LedgerError) -> Self {
        Self {
            ok: false,
            record: None,
            ledger_entry: None,
            error_kind: Some(err.kind().to_string()),
            message: Some(err.to_string()),
            status: err.status_code(),
        }
    }

    pub fn from_result(result: &LedgerResult<Committed>) -> Self {
        match result {
            Ok(committed) => Self::success(&committed.record, Some(&committed.entry)),
            Err(err) => Self::failure(err),
        }
    }
}

impl From<LedgerResult<Committed>> for OperationOutcome {
    fn from(result: LedgerResult<Committed>) -> Self {
        Self::from_result(&result)
    }
}

impl From<LedgerError> for OperationOutcome {
    fn from(err: LedgerError) -> Self {
        Self::failure(&err)
    }
}
