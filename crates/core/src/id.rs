//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// Identifier of a sellable product variant (SKU-level).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(Uuid);

/// Identifier of a warehouse (stock location).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(Uuid);

/// Identifier of a user (actor identity recorded on ledger entries).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of a customer order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

/// Identifier of a single order line (order item).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderItemId(Uuid);

/// Identifier of an immutable ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEntryId(Uuid);

/// Identifier of an order-line allocation link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7, so identifiers created later sort later.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| LedgerError::invalid_argument(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(VariantId, "VariantId");
impl_uuid_newtype!(WarehouseId, "WarehouseId");
impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(OrderId, "OrderId");
impl_uuid_newtype!(OrderItemId, "OrderItemId");
impl_uuid_newtype!(LedgerEntryId, "LedgerEntryId");
impl_uuid_newtype!(AllocationId, "AllocationId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        let id = WarehouseId::new();
        let parsed: WarehouseId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_id_is_invalid_argument() {
        let err = "not-a-uuid".parse::<VariantId>().unwrap_err();
        match err {
            LedgerError::InvalidArgument(msg) => assert!(msg.starts_with("VariantId")),
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let a = VariantId::from_uuid(Uuid::from_u128(1));
        let b = VariantId::from_uuid(Uuid::from_u128(2));
        assert!(a < b);
    }

    #[test]
    fn serializes_transparently() {
        let id = OrderId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
