use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    Aggregate, AggregateRoot, LedgerError, OrderId, OrderItemId, UserId, VariantId,
};
use stockledger_events::Event;

/// Order status lifecycle.
///
/// `draft → pending` happens when stock is reserved for every line,
/// `pending → confirmed` when reservations are allocated, and
/// `confirmed → shipped` when allocated stock leaves the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Pending,
    Confirmed,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order line: variant, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    reference: String,
    customer: Option<UserId>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            reference: String::new(),
            customer: None,
            status: OrderStatus::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    /// Human-facing order number, used in ledger references (`order:<reference>`).
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn customer(&self) -> Option<UserId> {
        self.customer
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, OrderStatus::Draft)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Draft | OrderStatus::Pending | OrderStatus::Confirmed
        )
    }

    /// Reference string written on ledger entries produced for this order.
    pub fn ledger_reference(&self) -> String {
        format!("order:{}", self.reference)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub reference: String,
    pub customer: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    AddLine(AddLine),
    PlaceOrder(PlaceOrder),
    ConfirmOrder(ConfirmOrder),
    CancelOrder(CancelOrder),
    ShipOrder(ShipOrder),
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub reference: String,
    pub customer: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub order_id: OrderId,
    pub line_no: u32,
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderPlaced (stock reserved for every line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    LineAdded(LineAdded),
    OrderPlaced(OrderPlaced),
    OrderConfirmed(OrderConfirmed),
    OrderCancelled(OrderCancelled),
    OrderShipped(OrderShipped),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::LineAdded(_) => "orders.order.line_added",
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderConfirmed(_) => "orders.order.confirmed",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
            OrderEvent::OrderShipped(_) => "orders.order.shipped",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::LineAdded(e) => e.occurred_at,
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderConfirmed(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.reference = e.reference.clone();
                self.customer = e.customer;
                self.status = OrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            OrderEvent::LineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    item_id: e.item_id,
                    variant_id: e.variant_id,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                });
            }
            OrderEvent::OrderPlaced(_) => self.status = OrderStatus::Pending,
            OrderEvent::OrderConfirmed(_) => self.status = OrderStatus::Confirmed,
            OrderEvent::OrderCancelled(_) => self.status = OrderStatus::Cancelled,
            OrderEvent::OrderShipped(_) => self.status = OrderStatus::Shipped,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::ShipOrder(cmd) => self.handle_ship(cmd),
        }
    }
}

impl Order {
    fn ensure_target(&self, order_id: OrderId) -> Result<(), LedgerError> {
        if !self.created {
            return Err(LedgerError::not_found(format!("order {order_id}")));
        }
        if self.id != order_id {
            return Err(LedgerError::invalid_argument("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: OrderStatus, action: &str) -> Result<(), LedgerError> {
        if self.status != expected {
            return Err(LedgerError::invalid_state(format!(
                "cannot {action} order {} in status {}; expected {expected}",
                self.reference, self.status
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, LedgerError> {
        if self.created {
            return Err(LedgerError::invalid_state("order already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(LedgerError::invalid_argument("order reference is required"));
        }

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            reference: cmd.reference.trim().to_string(),
            customer: cmd.customer,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<OrderEvent>, LedgerError> {
        self.ensure_target(cmd.order_id)?;

        if !self.is_modifiable() {
            return Err(LedgerError::invalid_state(
                "cannot modify order once it has been placed",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(LedgerError::invalid_argument("quantity must be positive"));
        }
        if self.lines.iter().any(|l| l.item_id == cmd.item_id) {
            return Err(LedgerError::invalid_argument(format!(
                "order item {} already on order",
                cmd.item_id
            )));
        }

        let next_line_no = (self.lines.len() as u32) + 1;

        Ok(vec![OrderEvent::LineAdded(LineAdded {
            order_id: cmd.order_id,
            line_no: next_line_no,
            item_id: cmd.item_id,
            variant_id: cmd.variant_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, LedgerError> {
        self.ensure_target(cmd.order_id)?;
        self.ensure_status(OrderStatus::Draft, "place")?;

        if self.lines.is_empty() {
            return Err(LedgerError::invalid_argument(
                "cannot place order without lines",
            ));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<OrderEvent>, LedgerError> {
        self.ensure_target(cmd.order_id)?;
        self.ensure_status(OrderStatus::Pending, "confirm")?;

        Ok(vec![OrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, LedgerError> {
        self.ensure_target(cmd.order_id)?;

        if !self.can_cancel() {
            return Err(LedgerError::invalid_state(format!(
                "cannot cancel order {} in status {}",
                self.reference, self.status
            )));
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipOrder) -> Result<Vec<OrderEvent>, LedgerError> {
        self.ensure_target(cmd.order_id)?;
        self.ensure_status(OrderStatus::Confirmed, "ship")?;

        Ok(vec![OrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
