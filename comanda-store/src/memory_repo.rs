use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use comanda_core::error::{StorageError, StorageResult};
use comanda_core::models::{
    ItemId, ItemPatch, NewOrderProduct, Order, OrderDraft, OrderId, OrderPatch, OrderProduct,
};
use comanda_core::repository::OrderRepository;
use comanda_core::search::{matches_all, ItemQuery, ItemSelection, OrderPredicate, OrderQuery};

#[derive(Default)]
struct MemoryState {
    /// Orders are stored without their items; items live in `items`.
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<ItemId, OrderProduct>,
    next_order_id: OrderId,
    next_item_id: ItemId,
}

impl MemoryState {
    fn push_items(&mut self, order_id: OrderId, items: &[NewOrderProduct]) -> Vec<OrderProduct> {
        items
            .iter()
            .map(|item| {
                self.next_item_id += 1;
                let row = OrderProduct {
                    id: self.next_item_id,
                    order_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    is_ready: false,
                    is_delivered: false,
                };
                self.items.insert(row.id, row.clone());
                row
            })
            .collect()
    }
}

/// In-process order store. Every call runs under one lock, so each call is
/// atomic with respect to every other.
#[derive(Default)]
pub struct MemoryOrderRepository {
    state: RwLock<MemoryState>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn create_order(&self, draft: &OrderDraft) -> StorageResult<Order> {
        let mut state = self.state.write().await;
        state.next_order_id += 1;
        let now = Utc::now();
        let mut order = Order {
            id: state.next_order_id,
            order_type: draft.order_type,
            status: draft.status,
            total_cents: draft.total_cents,
            payment_reference: None,
            establishment_id: draft.establishment_id,
            employee_id: draft.employee_id,
            table_id: draft.table_id,
            user_id: draft.user_id,
            address_id: draft.address_id.clone(),
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            cancelled_at: None,
            cancelled_by: None,
        };
        state.orders.insert(order.id, order.clone());
        order.items = state.push_items(order.id, &draft.items);
        debug!("Stored order {} with {} items", order.id, order.items.len());
        Ok(order)
    }

    async fn find_orders(&self, query: &OrderQuery) -> StorageResult<Vec<Order>> {
        let state = self.state.read().await;
        let mut rows: Vec<Order> = state
            .orders
            .values()
            .filter(|order| matches_all(&query.predicates, order))
            .cloned()
            .collect();
        rows.sort_by(|a, b| query.compare(a, b));
        let mut rows = query.page.apply(rows);

        for order in rows.iter_mut() {
            let items = match &query.items {
                ItemSelection::None => Vec::new(),
                ItemSelection::All => state
                    .items
                    .values()
                    .filter(|item| item.order_id == order.id)
                    .cloned()
                    .collect(),
                ItemSelection::Matching(predicates) => state
                    .items
                    .values()
                    .filter(|item| item.order_id == order.id)
                    .filter(|item| predicates.iter().all(|p| p.matches(item, order)))
                    .cloned()
                    .collect(),
            };
            order.items = items;
        }
        Ok(rows)
    }

    async fn find_items(&self, query: &ItemQuery) -> StorageResult<Vec<OrderProduct>> {
        let state = self.state.read().await;
        let rows: Vec<OrderProduct> = state
            .items
            .values()
            .filter(|item| {
                state
                    .orders
                    .get(&item.order_id)
                    .is_some_and(|owner| query.matches(item, owner))
            })
            .cloned()
            .collect();
        Ok(query.page.apply(rows))
    }

    async fn update_orders(
        &self,
        predicates: &[OrderPredicate],
        patch: &OrderPatch,
    ) -> StorageResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut updated = 0;
        for order in state.orders.values_mut() {
            if matches_all(predicates, order) {
                patch.apply(order, now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_items(
        &self,
        ids: &[ItemId],
        patch: &ItemPatch,
        require_ready: bool,
    ) -> StorageResult<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for item in state.items.values_mut() {
            if ids.contains(&item.id) && (!require_ready || item.is_ready) {
                patch.apply(item);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn append_items(
        &self,
        order_id: OrderId,
        guard: &[OrderPredicate],
        items: &[NewOrderProduct],
        additional_total_cents: i64,
    ) -> StorageResult<Option<Vec<ItemId>>> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if !matches_all(guard, order) {
            return Ok(None);
        }
        order.total_cents = order
            .total_cents
            .checked_add(additional_total_cents)
            .filter(|total| *total >= 0)
            .ok_or_else(|| {
                StorageError::OutOfRange(format!(
                    "total of order {} cannot grow by {}",
                    order_id, additional_total_cents
                ))
            })?;
        order.updated_at = Utc::now();

        let rows = state.push_items(order_id, items);
        Ok(Some(rows.into_iter().map(|item| item.id).collect()))
    }
}
