use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{ItemId, ItemPatch, NewOrderProduct, Order, OrderDraft, OrderId, OrderPatch, OrderProduct};
use crate::search::{ItemQuery, OrderPredicate, OrderQuery};

/// Persistence capability consumed by the order core.
///
/// Implementations must make each call atomic with respect to concurrent
/// readers: an append never becomes visible without its total, and a patch
/// never becomes visible column by column.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert an order with its initial line items. Storage assigns every id.
    async fn create_order(&self, draft: &OrderDraft) -> StorageResult<Order>;

    async fn find_orders(&self, query: &OrderQuery) -> StorageResult<Vec<Order>>;

    async fn find_items(&self, query: &ItemQuery) -> StorageResult<Vec<OrderProduct>>;

    /// Apply `patch` to every order matching all predicates. Returns the
    /// number of orders updated.
    async fn update_orders(
        &self,
        predicates: &[OrderPredicate],
        patch: &OrderPatch,
    ) -> StorageResult<u64>;

    /// Apply `patch` to the listed items, restricted to those that are
    /// already ready when `require_ready` is set. Returns the number updated.
    async fn update_items(
        &self,
        ids: &[ItemId],
        patch: &ItemPatch,
        require_ready: bool,
    ) -> StorageResult<u64>;

    /// Append line items to the order and add `additional_total_cents` to its
    /// total in one unit of work. The order must also satisfy `guard`;
    /// `None` means no order matched and nothing was written.
    async fn append_items(
        &self,
        order_id: OrderId,
        guard: &[OrderPredicate],
        items: &[NewOrderProduct],
        additional_total_cents: i64,
    ) -> StorageResult<Option<Vec<ItemId>>>;
}
