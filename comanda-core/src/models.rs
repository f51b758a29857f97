use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

pub type OrderId = i64;
pub type ItemId = i64;
pub type ProductId = i64;
pub type UserId = i64;
pub type EmployeeId = i64;
pub type TableId = i64;
pub type EstablishmentId = i64;

/// Order status in the lifecycle.
///
/// Serialized as its wire integer: WithoutPay = 1, Pending = 2, Completed = 3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u32", into = "u32")]
pub enum OrderStatus {
    WithoutPay,
    Pending,
    Completed,
}

impl OrderStatus {
    pub fn as_wire(self) -> u32 {
        match self {
            OrderStatus::WithoutPay => 1,
            OrderStatus::Pending => 2,
            OrderStatus::Completed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == OrderStatus::Completed
    }
}

impl TryFrom<u32> for OrderStatus {
    type Error = OrderError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OrderStatus::WithoutPay),
            2 => Ok(OrderStatus::Pending),
            3 => Ok(OrderStatus::Completed),
            other => Err(OrderError::InvalidInput(format!("unknown order status {}", other))),
        }
    }
}

impl From<OrderStatus> for u32 {
    fn from(status: OrderStatus) -> Self {
        status.as_wire()
    }
}

/// Channel an order was placed through. Local = 1, Delivery = 2 on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u32", into = "u32")]
pub enum OrderType {
    Local,
    Delivery,
}

impl OrderType {
    pub fn as_wire(self) -> u32 {
        match self {
            OrderType::Local => 1,
            OrderType::Delivery => 2,
        }
    }

    /// Status an order of this type starts in.
    pub fn initial_status(self) -> OrderStatus {
        match self {
            OrderType::Local => OrderStatus::Pending,
            OrderType::Delivery => OrderStatus::WithoutPay,
        }
    }
}

impl TryFrom<u32> for OrderType {
    type Error = OrderError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OrderType::Local),
            2 => Ok(OrderType::Delivery),
            other => Err(OrderError::InvalidInput(format!("unknown order type {}", other))),
        }
    }
}

impl From<OrderType> for u32 {
    fn from(order_type: OrderType) -> Self {
        order_type.as_wire()
    }
}

/// Cash = 1, Paypal = 2 on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u32", into = "u32")]
pub enum PaymentMethod {
    Cash,
    Paypal,
}

impl TryFrom<u32> for PaymentMethod {
    type Error = OrderError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PaymentMethod::Cash),
            2 => Ok(PaymentMethod::Paypal),
            other => Err(OrderError::InvalidInput(format!("unknown payment method {}", other))),
        }
    }
}

impl From<PaymentMethod> for u32 {
    fn from(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::Cash => 1,
            PaymentMethod::Paypal => 2,
        }
    }
}

/// The root entity: one restaurant order and its line items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: OrderId,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub payment_reference: Option<String>,
    pub establishment_id: Option<EstablishmentId>,
    pub employee_id: Option<EmployeeId>,
    pub table_id: Option<TableId>,
    pub user_id: Option<UserId>,
    pub address_id: Option<String>,
    pub items: Vec<OrderProduct>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cancelled_by: Option<UserId>,
}

impl Order {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

/// A line item. Owned by exactly one order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderProduct {
    pub id: ItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub is_ready: bool,
    pub is_delivered: bool,
}

/// Line item as requested by a caller, before storage assigns its id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewOrderProduct {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Creation request. Channel attributes are optional here and validated
/// against the order type before anything reaches storage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewOrder {
    #[serde(rename = "type")]
    pub order_type: Option<OrderType>,
    pub establishment_id: Option<EstablishmentId>,
    pub employee_id: Option<EmployeeId>,
    pub table_id: Option<TableId>,
    pub user_id: Option<UserId>,
    pub address_id: Option<String>,
    #[serde(default)]
    pub total_cents: i64,
    #[serde(default)]
    pub items: Vec<NewOrderProduct>,
}

/// A validated order ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub establishment_id: Option<EstablishmentId>,
    pub employee_id: Option<EmployeeId>,
    pub table_id: Option<TableId>,
    pub user_id: Option<UserId>,
    pub address_id: Option<String>,
    pub items: Vec<NewOrderProduct>,
}

/// Partial-column update for orders. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_reference: Option<String>,
    pub establishment_id: Option<EstablishmentId>,
    pub address_id: Option<String>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the populated columns to an in-memory order.
    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(reference) = &self.payment_reference {
            order.payment_reference = Some(reference.clone());
        }
        if let Some(establishment_id) = self.establishment_id {
            order.establishment_id = Some(establishment_id);
        }
        if let Some(address_id) = &self.address_id {
            order.address_id = Some(address_id.clone());
        }
        if let Some(actor) = self.cancelled_by {
            order.cancelled_by = Some(actor);
        }
        if let Some(at) = self.cancelled_at {
            order.cancelled_at = Some(at);
        }
        order.updated_at = now;
    }
}

/// Flag flips for line items. Flags only ever move from false to true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub mark_ready: bool,
    pub mark_delivered: bool,
}

impl ItemPatch {
    pub fn ready() -> Self {
        Self {
            mark_ready: true,
            mark_delivered: false,
        }
    }

    pub fn delivered() -> Self {
        Self {
            mark_ready: false,
            mark_delivered: true,
        }
    }

    pub fn apply(&self, item: &mut OrderProduct) {
        if self.mark_ready {
            item.is_ready = true;
        }
        if self.mark_delivered {
            item.is_delivered = true;
        }
    }
}

/// Render minor units with two decimals, e.g. `15000` -> `"150.00"`.
pub fn format_minor_units(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
