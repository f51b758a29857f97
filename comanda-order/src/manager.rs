use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use comanda_core::models::{
    EstablishmentId, ItemId, ItemPatch, NewOrder, NewOrderProduct, Order, OrderId, OrderPatch,
    OrderProduct, OrderStatus, OrderType, UserId,
};
use comanda_core::search::{ItemPredicate, ItemQuery, ItemSelection, OrderPredicate, OrderQuery};
use comanda_core::{ensure_id, OrderError, OrderRepository, OrderResult};

use crate::lifecycle::{self, Transition};

/// Manages order lifecycle and state transitions
#[derive(Clone)]
pub struct OrderManager {
    repo: Arc<dyn OrderRepository>,
}

impl OrderManager {
    pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
        Self { repo }
    }

    /// Create an order in its initial status. Storage assigns the ids.
    pub async fn create(&self, request: NewOrder) -> OrderResult<Order> {
        let draft = lifecycle::draft(request)?;
        let order = self.repo.create_order(&draft).await?;
        info!(
            "Created {:?} order {} with {} items in {:?}",
            order.order_type,
            order.id,
            order.items.len(),
            order.status
        );
        Ok(order)
    }

    /// Get a live (not cancelled) order by id
    pub async fn get(&self, order_id: OrderId) -> OrderResult<Order> {
        ensure_id(order_id, "order_id")?;
        self.repo
            .find_orders(
                &OrderQuery::filter(vec![
                    OrderPredicate::IdIn(vec![order_id]),
                    OrderPredicate::NotCancelled,
                ])
                .with_items(ItemSelection::All),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrderError::NotFound(format!("order {}", order_id)))
    }

    /// All line items of an order.
    pub async fn products(&self, order_id: OrderId) -> OrderResult<Vec<OrderProduct>> {
        Ok(self.get(order_id).await?.items)
    }

    /// Append line items and add `additional_total_cents` to the running
    /// total. Pricing is the caller's job. Not idempotent: repeating a call
    /// appends the items again.
    pub async fn add_line_items(
        &self,
        order_id: OrderId,
        items: Vec<NewOrderProduct>,
        additional_total_cents: i64,
    ) -> OrderResult<Vec<ItemId>> {
        if items.is_empty() {
            return Err(OrderError::InvalidInput("no line items to add".into()));
        }
        if additional_total_cents < 0 {
            return Err(OrderError::InvalidInput(format!(
                "additional total must not be negative, got {}",
                additional_total_cents
            )));
        }
        for item in &items {
            ensure_id(item.product_id, "product_id")?;
            if item.quantity == 0 {
                return Err(OrderError::InvalidInput(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }
        }

        let order = self.get(order_id).await?;
        let allowed = lifecycle::appendable_statuses(order.order_type);
        if !allowed.contains(&order.status) {
            return Err(items_rejected(order.status));
        }

        let guard = [
            OrderPredicate::StatusIn(allowed.to_vec()),
            OrderPredicate::NotCancelled,
        ];
        match self
            .repo
            .append_items(order_id, &guard, &items, additional_total_cents)
            .await?
        {
            Some(ids) => {
                info!("Appended {} items to order {} (+{})", ids.len(), order_id, additional_total_cents);
                Ok(ids)
            }
            None => {
                // Moved on between the read and the append.
                let current = self.get(order_id).await?;
                Err(items_rejected(current.status))
            }
        }
    }

    /// Kitchen finished an item. Marking an already-ready item is a no-op.
    /// Items of retired orders read as missing.
    pub async fn mark_product_ready(&self, item_id: ItemId) -> OrderResult<()> {
        ensure_id(item_id, "item_id")?;
        let found = self
            .repo
            .find_items(&ItemQuery::filter(vec![
                ItemPredicate::IdIn(vec![item_id]),
                ItemPredicate::Order(OrderPredicate::NotCancelled),
            ]))
            .await?;
        let Some(item) = found.first() else {
            return Err(OrderError::NotFound(format!("order product {}", item_id)));
        };
        if item.is_ready {
            return Ok(());
        }
        self.repo.update_items(&[item_id], &ItemPatch::ready(), false).await?;
        info!("Order product {} of order {} is ready", item_id, item.order_id);
        Ok(())
    }

    /// Hand items off to the table. All listed items must exist and be
    /// ready; otherwise nothing changes.
    pub async fn mark_products_delivered(&self, item_ids: &[ItemId]) -> OrderResult<()> {
        if item_ids.is_empty() {
            return Err(OrderError::InvalidInput("no order products to deliver".into()));
        }
        let ids: BTreeSet<ItemId> = item_ids
            .iter()
            .map(|&id| ensure_id(id, "item_id"))
            .collect::<OrderResult<_>>()?;
        let ids: Vec<ItemId> = ids.into_iter().collect();

        let found = self
            .repo
            .find_items(&ItemQuery::filter(vec![
                ItemPredicate::IdIn(ids.clone()),
                ItemPredicate::Order(OrderPredicate::NotCancelled),
            ]))
            .await?;

        let missing: Vec<ItemId> = ids
            .iter()
            .copied()
            .filter(|id| !found.iter().any(|item| item.id == *id))
            .collect();
        if !missing.is_empty() {
            return Err(OrderError::NotFound(format!("order products {:?}", missing)));
        }

        let not_ready: Vec<ItemId> = found.iter().filter(|item| !item.is_ready).map(|item| item.id).collect();
        if !not_ready.is_empty() {
            warn!("Rejected delivery of order products {:?}: not ready", not_ready);
            return Err(OrderError::InvalidTransition {
                from: format!("order products {:?} not ready", not_ready),
                to: "delivered".to_string(),
            });
        }

        let updated = self.repo.update_items(&ids, &ItemPatch::delivered(), true).await?;
        info!("Delivered {} order products", updated);
        Ok(())
    }

    /// Local completion: `Pending -> Completed` for a local order at the
    /// establishment that owns it.
    pub async fn complete_local(
        &self,
        order_id: OrderId,
        establishment_id: EstablishmentId,
    ) -> OrderResult<Order> {
        ensure_id(establishment_id, "establishment_id")?;
        let mut order = self.get(order_id).await?;

        if order.order_type != OrderType::Local {
            return Err(OrderError::invalid_transition(order.status, OrderStatus::Completed));
        }
        if order.establishment_id != Some(establishment_id) {
            warn!(
                "Establishment {} attempted to complete order {} owned by {:?}",
                establishment_id, order_id, order.establishment_id
            );
            return Err(OrderError::Forbidden(format!(
                "order {} does not belong to establishment {}",
                order_id, establishment_id
            )));
        }
        let next = lifecycle::next_status(order.order_type, order.status, Transition::SettleLocally)?;

        let updated = self
            .repo
            .update_orders(
                &[
                    OrderPredicate::IdIn(vec![order_id]),
                    OrderPredicate::StatusIn(vec![order.status]),
                    OrderPredicate::NotCancelled,
                ],
                &OrderPatch::status(next),
            )
            .await?;
        if updated == 0 {
            let current = self.get(order_id).await?;
            return Err(OrderError::invalid_transition(current.status, next));
        }

        info!("Order {} completed locally at establishment {}", order_id, establishment_id);
        order.status = next;
        Ok(order)
    }

    /// Retire every listed order that has not completed. Orders that are
    /// missing, completed or already retired are reported in a `Conflict`
    /// while the rest are still retired.
    pub async fn cancel(&self, order_ids: &[OrderId], actor_id: UserId) -> OrderResult<Vec<OrderId>> {
        if order_ids.is_empty() {
            return Err(OrderError::InvalidInput("no orders to cancel".into()));
        }
        ensure_id(actor_id, "actor_id")?;
        let requested: BTreeSet<OrderId> = order_ids.iter().copied().collect();
        let requested: Vec<OrderId> = requested.into_iter().collect();

        let live = self
            .repo
            .find_orders(&OrderQuery::filter(vec![
                OrderPredicate::IdIn(requested.clone()),
                OrderPredicate::NotCancelled,
            ]))
            .await?;
        let cancellable: Vec<OrderId> = live
            .iter()
            .filter(|order| lifecycle::can_cancel(order.status))
            .map(|order| order.id)
            .collect();

        if !cancellable.is_empty() {
            let patch = OrderPatch {
                cancelled_by: Some(actor_id),
                cancelled_at: Some(Utc::now()),
                ..OrderPatch::default()
            };
            self.repo
                .update_orders(
                    &[
                        OrderPredicate::IdIn(cancellable.clone()),
                        OrderPredicate::StatusIn(vec![OrderStatus::WithoutPay, OrderStatus::Pending]),
                        OrderPredicate::NotCancelled,
                    ],
                    &patch,
                )
                .await?;
        }

        // Whatever is still live was not retired, including orders that
        // completed between the read and the update.
        let still_live: Vec<OrderId> = self
            .repo
            .find_orders(&OrderQuery::filter(vec![
                OrderPredicate::IdIn(requested.clone()),
                OrderPredicate::NotCancelled,
            ]))
            .await?
            .into_iter()
            .map(|order| order.id)
            .collect();
        let succeeded: Vec<OrderId> = cancellable
            .iter()
            .copied()
            .filter(|id| !still_live.contains(id))
            .collect();
        let failed: Vec<OrderId> = requested
            .iter()
            .copied()
            .filter(|id| !succeeded.contains(id))
            .collect();

        info!("Actor {} cancelled orders {:?}", actor_id, succeeded);
        if !failed.is_empty() {
            warn!("Orders {:?} could not be cancelled", failed);
            return Err(OrderError::Conflict {
                action: "cancelled",
                failed,
                succeeded,
            });
        }
        Ok(succeeded)
    }
}

fn items_rejected(status: OrderStatus) -> OrderError {
    OrderError::InvalidTransition {
        from: format!("{:?}", status),
        to: "line items added".to_string(),
    }
}
