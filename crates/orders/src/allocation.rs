//! Order-line ↔ stock-record links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AllocationId, Entity, LedgerError, LedgerResult, OrderId, OrderItemId};
use stockledger_inventory::StockKey;

/// Where the linked quantity currently sits on the stock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationState {
    Reserved,
    Allocated,
    Consumed,
    Released,
}

impl AllocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::Reserved => "reserved",
            AllocationState::Allocated => "allocated",
            AllocationState::Consumed => "consumed",
            AllocationState::Released => "released",
        }
    }

    pub fn parse(raw: &str) -> LedgerResult<Self> {
        match raw {
            "reserved" => Ok(AllocationState::Reserved),
            "allocated" => Ok(AllocationState::Allocated),
            "consumed" => Ok(AllocationState::Consumed),
            "released" => Ok(AllocationState::Released),
            other => Err(LedgerError::invalid_argument(format!(
                "unknown allocation state '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AllocationState::Consumed | AllocationState::Released)
    }
}

/// Quantity taken from one stock record for one order line.
///
/// Unique per (order item, stock key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    id: AllocationId,
    order_id: OrderId,
    order_item_id: OrderItemId,
    line_no: u32,
    key: StockKey,
    quantity: i64,
    state: AllocationState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Allocation {
    /// A new link for stock that has just been reserved.
    pub fn reserved(
        order_id: OrderId,
        order_item_id: OrderItemId,
        line_no: u32,
        key: StockKey,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if quantity <= 0 {
            return Err(LedgerError::invalid_argument(
                "allocation quantity must be positive",
            ));
        }
        Ok(Self {
            id: AllocationId::new(),
            order_id,
            order_item_id,
            line_no,
            key,
            quantity,
            state: AllocationState::Reserved,
            created_at: at,
            updated_at: at,
        })
    }

    /// Rebuild a link read back from durable storage.
    pub fn rehydrate(snapshot: AllocationSnapshot) -> LedgerResult<Self> {
        if snapshot.quantity <= 0 {
            return Err(LedgerError::invalid_state(format!(
                "stored allocation {} has quantity {}",
                snapshot.id, snapshot.quantity
            )));
        }
        Ok(Self {
            id: snapshot.id,
            order_id: snapshot.order_id,
            order_item_id: snapshot.order_item_id,
            line_no: snapshot.line_no,
            key: snapshot.key,
            quantity: snapshot.quantity,
            state: snapshot.state,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        })
    }

    pub fn allocation_id(&self) -> AllocationId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn order_item_id(&self) -> OrderItemId {
        self.order_item_id
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn state(&self) -> AllocationState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move to `next`, checking the transition is legal.
    pub fn transition(&mut self, next: AllocationState, at: DateTime<Utc>) -> LedgerResult<()> {
        use AllocationState::*;
        let legal = matches!(
            (self.state, next),
            (Reserved, Allocated)
                | (Reserved, Released)
                | (Allocated, Reserved)
                | (Allocated, Consumed)
        );
        if !legal {
            return Err(LedgerError::invalid_state(format!(
                "allocation {} cannot move from {} to {}",
                self.id,
                self.state.as_str(),
                next.as_str()
            )));
        }
        self.state = next;
        self.updated_at = at;
        Ok(())
    }
}

/// Plain field view of a link, used at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSnapshot {
    pub id: AllocationId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub line_no: u32,
    pub key: StockKey,
    pub quantity: i64,
    pub state: AllocationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Allocation {
    type Id = AllocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
