//! Search vocabulary shared by the query builder and the storage adapters.
//!
//! `SearchSpec` is what callers send. The query builder lowers it into an
//! [`OrderQuery`]: a conjunction of typed predicate descriptors plus sort and
//! paging. Storage adapters evaluate the descriptors natively (SQL) or with
//! the in-process `matches` helpers defined here.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{
    EmployeeId, EstablishmentId, ItemId, Order, OrderId, OrderProduct, OrderStatus, OrderType,
    UserId,
};

/// Sortable columns. Wire values: CreationTime = 0, Price = 1,
/// Establishment = 2, Status = 3, Type = 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    CreationTime,
    Price,
    Establishment,
    Status,
    Type,
}

impl SortKey {
    /// Unknown wire values map to `None` and are dropped by the builder.
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(SortKey::CreationTime),
            1 => Some(SortKey::Price),
            2 => Some(SortKey::Establishment),
            3 => Some(SortKey::Status),
            4 => Some(SortKey::Type),
            _ => None,
        }
    }

    pub fn compare(self, a: &Order, b: &Order) -> Ordering {
        match self {
            SortKey::CreationTime => a.created_at.cmp(&b.created_at),
            SortKey::Price => a.total_cents.cmp(&b.total_cents),
            SortKey::Establishment => a.establishment_id.cmp(&b.establishment_id),
            SortKey::Status => a.status.cmp(&b.status),
            SortKey::Type => a.order_type.cmp(&b.order_type),
        }
    }
}

/// Asc = 0, Desc = 1. Any other wire value reads as ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl From<u32> for SortDirection {
    fn from(value: u32) -> Self {
        if value == 1 {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

impl From<SortDirection> for u32 {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => 0,
            SortDirection::Desc => 1,
        }
    }
}

/// One requested sort column, still in wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub by: u32,
    #[serde(default)]
    pub sort: SortDirection,
}

/// Limit/offset pair. Zero limit means unbounded, zero offset means no skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

impl Page {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let rows = rows.into_iter().skip(self.offset as usize);
        if self.limit == 0 {
            rows.collect()
        } else {
            rows.take(self.limit as usize).collect()
        }
    }
}

/// Request-scoped search criteria. An empty filter set places no restriction
/// on its dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpec {
    pub statuses: Vec<OrderStatus>,
    pub types: Vec<OrderType>,
    pub establishments: Vec<EstablishmentId>,
    pub users: Vec<UserId>,
    /// Inclusive lower bound on the total, ignored unless strictly positive.
    pub min_total_cents: i64,
    /// Inclusive upper bound on the total, ignored unless strictly positive.
    pub max_total_cents: i64,
    pub order_by: Vec<OrderBy>,
    #[serde(flatten)]
    pub page: Page,
}

/// A single conjunctive filter over orders.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderPredicate {
    IdIn(Vec<OrderId>),
    IdAfter(OrderId),
    StatusIn(Vec<OrderStatus>),
    StatusNot(OrderStatus),
    TypeIn(Vec<OrderType>),
    EstablishmentIn(Vec<EstablishmentId>),
    UserIn(Vec<UserId>),
    EmployeeIs(EmployeeId),
    TotalAtLeast(i64),
    TotalAtMost(i64),
    PaymentReferenceIs(String),
    HasPaymentReference,
    NotCancelled,
}

impl OrderPredicate {
    pub fn matches(&self, order: &Order) -> bool {
        match self {
            OrderPredicate::IdIn(ids) => ids.contains(&order.id),
            OrderPredicate::IdAfter(last) => order.id > *last,
            OrderPredicate::StatusIn(statuses) => statuses.contains(&order.status),
            OrderPredicate::StatusNot(status) => order.status != *status,
            OrderPredicate::TypeIn(types) => types.contains(&order.order_type),
            OrderPredicate::EstablishmentIn(ids) => order
                .establishment_id
                .is_some_and(|id| ids.contains(&id)),
            OrderPredicate::UserIn(ids) => order.user_id.is_some_and(|id| ids.contains(&id)),
            OrderPredicate::EmployeeIs(id) => order.employee_id == Some(*id),
            OrderPredicate::TotalAtLeast(min) => order.total_cents >= *min,
            OrderPredicate::TotalAtMost(max) => order.total_cents <= *max,
            OrderPredicate::PaymentReferenceIs(reference) => {
                order.payment_reference.as_deref() == Some(reference.as_str())
            }
            OrderPredicate::HasPaymentReference => order.payment_reference.is_some(),
            OrderPredicate::NotCancelled => !order.is_cancelled(),
        }
    }
}

pub fn matches_all(predicates: &[OrderPredicate], order: &Order) -> bool {
    predicates.iter().all(|p| p.matches(order))
}

/// A single conjunctive filter over line items. `Order` lifts an order
/// predicate onto the item's owning order.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPredicate {
    IdIn(Vec<ItemId>),
    IdAfter(ItemId),
    OrderIs(OrderId),
    Ready(bool),
    Delivered(bool),
    Order(OrderPredicate),
}

impl ItemPredicate {
    pub fn matches(&self, item: &OrderProduct, owner: &Order) -> bool {
        match self {
            ItemPredicate::IdIn(ids) => ids.contains(&item.id),
            ItemPredicate::IdAfter(last) => item.id > *last,
            ItemPredicate::OrderIs(order_id) => item.order_id == *order_id,
            ItemPredicate::Ready(ready) => item.is_ready == *ready,
            ItemPredicate::Delivered(delivered) => item.is_delivered == *delivered,
            ItemPredicate::Order(predicate) => predicate.matches(owner),
        }
    }
}

/// Which line items to load alongside matched orders.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ItemSelection {
    #[default]
    None,
    All,
    Matching(Vec<ItemPredicate>),
}

/// A fully lowered order retrieval request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderQuery {
    pub predicates: Vec<OrderPredicate>,
    pub sort: Vec<(SortKey, SortDirection)>,
    pub page: Page,
    pub items: ItemSelection,
}

impl OrderQuery {
    pub fn filter(predicates: Vec<OrderPredicate>) -> Self {
        Self {
            predicates,
            ..Self::default()
        }
    }

    pub fn with_items(mut self, items: ItemSelection) -> Self {
        self.items = items;
        self
    }

    /// Multi-column ordering, left to right, with id as the final tie-breaker.
    pub fn compare(&self, a: &Order, b: &Order) -> Ordering {
        self.sort
            .iter()
            .map(|(key, direction)| match direction {
                SortDirection::Asc => key.compare(a, b),
                SortDirection::Desc => key.compare(a, b).reverse(),
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }
}

/// A line item retrieval request, always ordered by item id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemQuery {
    pub predicates: Vec<ItemPredicate>,
    pub page: Page,
}

impl ItemQuery {
    pub fn filter(predicates: Vec<ItemPredicate>) -> Self {
        Self {
            predicates,
            page: Page::unbounded(),
        }
    }

    pub fn matches(&self, item: &OrderProduct, owner: &Order) -> bool {
        self.predicates.iter().all(|p| p.matches(item, owner))
    }
}
