//! Ledger error model.

use thiserror::Error;

use crate::id::VariantId;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every variant is a synchronous, typed failure that callers must surface.
/// Stock errors are never converted into success further up the stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed input (e.g. a non-positive quantity).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No record exists for the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Not enough available stock to satisfy a request.
    #[error("insufficient stock for variant {variant}: requested {requested}, available {available}")]
    InsufficientStock {
        variant: VariantId,
        requested: i64,
        available: i64,
    },

    /// The operation is illegal for the current record or order state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An attempt was made to rewrite an existing ledger entry.
    #[error("immutable record violation: {0}")]
    ImmutableRecordViolation(String),

    /// Storage backend failure (poisoned lock, database error, ...).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn insufficient_stock(variant: VariantId, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            variant,
            requested,
            available,
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn immutable(msg: impl Into<String>) -> Self {
        Self::ImmutableRecordViolation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable error kind name, exposed to collaborators in result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "InvalidArgument",
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::InsufficientStock { .. } => "InsufficientStock",
            LedgerError::InvalidState(_) => "InvalidState",
            LedgerError::ImmutableRecordViolation(_) => "ImmutableRecordViolation",
            LedgerError::Storage(_) => "Storage",
        }
    }

    /// HTTP status an outer transport layer should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InvalidArgument(_) => 400,
            LedgerError::NotFound(_) => 404,
            LedgerError::InsufficientStock { .. }
            | LedgerError::InvalidState(_)
            | LedgerError::ImmutableRecordViolation(_) => 409,
            LedgerError::Storage(_) => 500,
        }
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, LedgerError::InsufficientStock { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_names() {
        let variant = VariantId::new();
        assert_eq!(LedgerError::invalid_argument("x").kind(), "InvalidArgument");
        assert_eq!(LedgerError::not_found("x").kind(), "NotFound");
        assert_eq!(
            LedgerError::insufficient_stock(variant, 3, 1).kind(),
            "InsufficientStock"
        );
        assert_eq!(LedgerError::invalid_state("x").kind(), "InvalidState");
        assert_eq!(LedgerError::immutable("x").kind(), "ImmutableRecordViolation");
        assert_eq!(LedgerError::storage("x").kind(), "Storage");
    }

    #[test]
    fn client_errors_map_to_4xx() {
        let variant = VariantId::new();
        assert_eq!(LedgerError::invalid_argument("qty").status_code(), 400);
        assert_eq!(LedgerError::not_found("key").status_code(), 404);
        assert_eq!(LedgerError::insufficient_stock(variant, 2, 0).status_code(), 409);
        assert_eq!(LedgerError::invalid_state("released").status_code(), 409);
        assert_eq!(LedgerError::storage("poisoned").status_code(), 500);
    }

    #[test]
    fn insufficient_stock_message_names_variant() {
        let variant = VariantId::new();
        let err = LedgerError::insufficient_stock(variant, 10, 2);
        assert!(err.to_string().contains(&variant.to_string()));
        assert!(err.is_insufficient_stock());
    }
}
