use std::sync::Arc;

use tracing::debug;

use comanda_core::models::{EmployeeId, EstablishmentId, ItemId, Order, OrderId, OrderProduct, OrderStatus, OrderType, UserId};
use comanda_core::search::{
    ItemPredicate, ItemQuery, ItemSelection, OrderPredicate, OrderQuery, Page, SearchSpec, SortDirection, SortKey,
};
use comanda_core::{ensure_id, OrderRepository, OrderResult};

/// Lowers a [`SearchSpec`] into an [`OrderQuery`].
///
/// Every populated dimension adds one conjunctive predicate. Empty
/// dimensions add nothing. Retired orders are always excluded.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: OrderQuery,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            query: OrderQuery::filter(vec![OrderPredicate::NotCancelled]),
        }
    }

    pub fn from_spec(spec: &SearchSpec) -> Self {
        let mut builder = Self::new();
        if !spec.statuses.is_empty() {
            builder = builder.filter(OrderPredicate::StatusIn(spec.statuses.clone()));
        }
        if !spec.types.is_empty() {
            builder = builder.filter(OrderPredicate::TypeIn(spec.types.clone()));
        }
        if !spec.establishments.is_empty() {
            builder = builder.filter(OrderPredicate::EstablishmentIn(spec.establishments.clone()));
        }
        if !spec.users.is_empty() {
            builder = builder.filter(OrderPredicate::UserIn(spec.users.clone()));
        }
        // Zero or negative bounds read as unset.
        if spec.min_total_cents > 0 {
            builder = builder.filter(OrderPredicate::TotalAtLeast(spec.min_total_cents));
        }
        if spec.max_total_cents > 0 {
            builder = builder.filter(OrderPredicate::TotalAtMost(spec.max_total_cents));
        }
        for order_by in &spec.order_by {
            match SortKey::from_wire(order_by.by) {
                Some(key) => builder = builder.sort_by(key, order_by.sort),
                None => debug!("Dropping unknown sort key {}", order_by.by),
            }
        }
        builder.page(spec.page)
    }

    pub fn filter(mut self, predicate: OrderPredicate) -> Self {
        self.query.predicates.push(predicate);
        self
    }

    pub fn sort_by(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.query.sort.push((key, direction));
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.query.page = page;
        self
    }

    pub fn include_items(mut self, items: ItemSelection) -> Self {
        self.query.items = items;
        self
    }

    pub fn build(self) -> OrderQuery {
        self.query
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read views over orders. Absence of data is an empty result, not an error.
#[derive(Clone)]
pub struct OrderQueries {
    repo: Arc<dyn OrderRepository>,
}

impl OrderQueries {
    pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
        Self { repo }
    }

    /// General search. Matched orders come back with their line items.
    pub async fn search(&self, spec: &SearchSpec) -> OrderResult<Vec<Order>> {
        let query = QueryBuilder::from_spec(spec).include_items(ItemSelection::All).build();
        Ok(self.repo.find_orders(&query).await?)
    }

    /// Kitchen board: not-ready items of paid or local orders at one
    /// establishment, by item id. `last_seen` resumes after a previous poll.
    pub async fn kitchen(
        &self,
        establishment_id: EstablishmentId,
        last_seen: Option<ItemId>,
    ) -> OrderResult<Vec<OrderProduct>> {
        ensure_id(establishment_id, "establishment_id")?;
        let mut predicates = vec![
            ItemPredicate::Ready(false),
            ItemPredicate::Order(OrderPredicate::EstablishmentIn(vec![establishment_id])),
            ItemPredicate::Order(OrderPredicate::StatusNot(OrderStatus::WithoutPay)),
            ItemPredicate::Order(OrderPredicate::NotCancelled),
        ];
        if let Some(last) = last_seen.filter(|&id| id > 0) {
            predicates.push(ItemPredicate::IdAfter(last));
        }
        Ok(self.repo.find_items(&ItemQuery::filter(predicates)).await?)
    }

    /// A waiter's own pending orders with all their items.
    pub async fn waiter(&self, employee_id: EmployeeId) -> OrderResult<Vec<Order>> {
        self.waiter_view(employee_id, ItemSelection::All).await
    }

    /// A waiter's pending orders with only the items ready for hand-off.
    pub async fn waiter_pending(&self, employee_id: EmployeeId) -> OrderResult<Vec<Order>> {
        self.waiter_view(
            employee_id,
            ItemSelection::Matching(vec![ItemPredicate::Ready(true), ItemPredicate::Delivered(false)]),
        )
        .await
    }

    async fn waiter_view(&self, employee_id: EmployeeId, items: ItemSelection) -> OrderResult<Vec<Order>> {
        ensure_id(employee_id, "employee_id")?;
        let query = QueryBuilder::new()
            .filter(OrderPredicate::EmployeeIs(employee_id))
            .filter(OrderPredicate::StatusIn(vec![OrderStatus::Pending]))
            .include_items(items)
            .build();
        Ok(self.repo.find_orders(&query).await?)
    }

    /// A customer's own delivery orders. User and type scoping replace
    /// whatever the caller supplied.
    pub async fn user_history(&self, user_id: UserId, spec: &SearchSpec) -> OrderResult<Vec<Order>> {
        ensure_id(user_id, "user_id")?;
        let scoped = SearchSpec {
            users: vec![user_id],
            types: vec![OrderType::Delivery],
            ..spec.clone()
        };
        self.search(&scoped).await
    }

    /// Back-office view of one establishment. Any user filter is cleared.
    pub async fn establishment_orders(
        &self,
        establishment_id: EstablishmentId,
        spec: &SearchSpec,
    ) -> OrderResult<Vec<Order>> {
        ensure_id(establishment_id, "establishment_id")?;
        let scoped = SearchSpec {
            establishments: vec![establishment_id],
            users: Vec::new(),
            ..spec.clone()
        };
        self.search(&scoped).await
    }

    /// Authorized delivery orders still waiting for a capture, in id order
    /// and strictly after `after` when given.
    pub async fn awaiting_capture(&self, after: Option<OrderId>, limit: u32) -> OrderResult<Vec<Order>> {
        let mut builder = QueryBuilder::new()
            .filter(OrderPredicate::TypeIn(vec![OrderType::Delivery]))
            .filter(OrderPredicate::StatusIn(vec![OrderStatus::Pending]))
            .filter(OrderPredicate::HasPaymentReference);
        if let Some(last) = after {
            builder = builder.filter(OrderPredicate::IdAfter(last));
        }
        let query = builder.page(Page { limit, offset: 0 }).build();
        Ok(self.repo.find_orders(&query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_core::models::{NewOrder, NewOrderProduct, OrderPatch};
    use comanda_core::search::OrderBy;
    use comanda_store::MemoryOrderRepository;

    use crate::manager::OrderManager;

    fn setup() -> (OrderManager, OrderQueries, Arc<dyn OrderRepository>) {
        let repo: Arc<dyn OrderRepository> = Arc::new(MemoryOrderRepository::new());
        (OrderManager::new(repo.clone()), OrderQueries::new(repo.clone()), repo)
    }

    fn local(establishment_id: i64, employee_id: i64, total_cents: i64) -> NewOrder {
        NewOrder {
            order_type: Some(OrderType::Local),
            establishment_id: Some(establishment_id),
            employee_id: Some(employee_id),
            table_id: Some(1),
            total_cents,
            items: vec![NewOrderProduct { product_id: 7, quantity: 2 }],
            ..NewOrder::default()
        }
    }

    fn delivery(user_id: i64, total_cents: i64) -> NewOrder {
        NewOrder {
            order_type: Some(OrderType::Delivery),
            user_id: Some(user_id),
            establishment_id: Some(1),
            address_id: Some("addr-1".into()),
            total_cents,
            items: vec![NewOrderProduct { product_id: 3, quantity: 1 }],
            ..NewOrder::default()
        }
    }

    #[test]
    fn test_builder_skips_empty_dimensions() {
        let query = QueryBuilder::from_spec(&SearchSpec::default()).build();
        assert_eq!(query.predicates, vec![OrderPredicate::NotCancelled]);
        assert!(query.sort.is_empty());
        assert_eq!(query.page, Page::unbounded());
    }

    #[test]
    fn test_builder_ignores_non_positive_bounds() {
        let spec = SearchSpec {
            min_total_cents: 0,
            max_total_cents: -5,
            ..SearchSpec::default()
        };
        assert_eq!(QueryBuilder::from_spec(&spec).build().predicates.len(), 1);

        let spec = SearchSpec {
            min_total_cents: 100,
            max_total_cents: 900,
            ..SearchSpec::default()
        };
        let predicates = QueryBuilder::from_spec(&spec).build().predicates;
        assert!(predicates.contains(&OrderPredicate::TotalAtLeast(100)));
        assert!(predicates.contains(&OrderPredicate::TotalAtMost(900)));
    }

    #[test]
    fn test_builder_drops_unknown_sort_keys() {
        let spec = SearchSpec {
            order_by: vec![
                OrderBy { by: 1, sort: SortDirection::Desc },
                OrderBy { by: 42, sort: SortDirection::Asc },
                OrderBy { by: 3, sort: SortDirection::Asc },
            ],
            ..SearchSpec::default()
        };
        let query = QueryBuilder::from_spec(&spec).build();
        assert_eq!(
            query.sort,
            vec![(SortKey::Price, SortDirection::Desc), (SortKey::Status, SortDirection::Asc)]
        );
    }

    #[tokio::test]
    async fn test_status_filter_narrows_search() {
        let (manager, queries, _) = setup();
        let done = manager.create(local(1, 1, 100)).await.unwrap();
        manager.create(local(1, 1, 200)).await.unwrap();
        manager.create(delivery(42, 300)).await.unwrap();
        manager.complete_local(done.id, 1).await.unwrap();

        let all = queries.search(&SearchSpec::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|o| !o.items.is_empty()));

        let pending = queries
            .search(&SearchSpec {
                statuses: vec![OrderStatus::Pending],
                ..SearchSpec::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending.iter().all(|o| all.iter().any(|a| a.id == o.id)));
    }

    #[tokio::test]
    async fn test_search_sorts_and_pages() {
        let (manager, queries, _) = setup();
        for total in [500, 100, 300] {
            manager.create(local(1, 1, total)).await.unwrap();
        }
        let spec = SearchSpec {
            order_by: vec![OrderBy { by: 1, sort: SortDirection::Desc }],
            page: Page { limit: 2, offset: 1 },
            ..SearchSpec::default()
        };
        let totals: Vec<i64> = queries.search(&spec).await.unwrap().iter().map(|o| o.total_cents).collect();
        assert_eq!(totals, vec![300, 100]);
    }

    #[tokio::test]
    async fn test_kitchen_hides_unpaid_and_ready_items() {
        let (manager, queries, _) = setup();
        let dine_in = manager.create(local(1, 1, 0)).await.unwrap();
        manager.create(delivery(42, 1000)).await.unwrap();
        manager.create(local(2, 1, 0)).await.unwrap();

        let board = queries.kitchen(1, None).await.unwrap();
        assert_eq!(board.iter().map(|i| i.order_id).collect::<Vec<_>>(), vec![dine_in.id]);

        manager.mark_product_ready(dine_in.items[0].id).await.unwrap();
        assert!(queries.kitchen(1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kitchen_resumes_after_cursor() {
        let (manager, queries, _) = setup();
        let mut req = local(1, 1, 0);
        req.items.push(NewOrderProduct { product_id: 8, quantity: 1 });
        let order = manager.create(req).await.unwrap();
        let (first, second) = (order.items[0].id, order.items[1].id);

        let board = queries.kitchen(1, Some(first)).await.unwrap();
        assert_eq!(board.iter().map(|i| i.id).collect::<Vec<_>>(), vec![second]);
    }

    #[tokio::test]
    async fn test_waiter_views() {
        let (manager, queries, _) = setup();
        let mine = manager.create(local(1, 5, 0)).await.unwrap();
        manager.create(local(1, 6, 0)).await.unwrap();
        let closed = manager.create(local(1, 5, 0)).await.unwrap();
        manager.complete_local(closed.id, 1).await.unwrap();

        let orders = queries.waiter(5).await.unwrap();
        assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![mine.id]);
        assert_eq!(orders[0].items.len(), 1);

        let handoff = queries.waiter_pending(5).await.unwrap();
        assert_eq!(handoff.len(), 1);
        assert!(handoff[0].items.is_empty());

        manager.mark_product_ready(mine.items[0].id).await.unwrap();
        let handoff = queries.waiter_pending(5).await.unwrap();
        assert_eq!(handoff[0].items.len(), 1);

        manager.mark_products_delivered(&[mine.items[0].id]).await.unwrap();
        assert!(queries.waiter_pending(5).await.unwrap()[0].items.is_empty());
    }

    #[tokio::test]
    async fn test_user_history_is_scoped() {
        let (manager, queries, _) = setup();
        let own = manager.create(delivery(42, 100)).await.unwrap();
        manager.create(delivery(43, 100)).await.unwrap();
        manager.create(local(1, 1, 100)).await.unwrap();

        // A caller-supplied user filter cannot widen the view.
        let spec = SearchSpec {
            users: vec![43],
            types: vec![OrderType::Local],
            ..SearchSpec::default()
        };
        let history = queries.user_history(42, &spec).await.unwrap();
        assert_eq!(history.iter().map(|o| o.id).collect::<Vec<_>>(), vec![own.id]);
    }

    #[tokio::test]
    async fn test_establishment_orders_clear_user_filter() {
        let (manager, queries, _) = setup();
        let a = manager.create(delivery(42, 100)).await.unwrap();
        let b = manager.create(local(1, 1, 100)).await.unwrap();
        manager.create(local(2, 1, 100)).await.unwrap();

        let spec = SearchSpec {
            users: vec![999],
            establishments: vec![2],
            ..SearchSpec::default()
        };
        let rows = queries.establishment_orders(1, &spec).await.unwrap();
        assert_eq!(rows.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_awaiting_capture() {
        let (manager, queries, repo) = setup();
        let paid = manager.create(delivery(42, 100)).await.unwrap();
        manager.create(delivery(43, 100)).await.unwrap();
        let later = manager.create(delivery(44, 100)).await.unwrap();
        repo.update_orders(
            &[OrderPredicate::IdIn(vec![paid.id, later.id])],
            &OrderPatch {
                status: Some(OrderStatus::Pending),
                payment_reference: Some("PAY-1".into()),
                ..OrderPatch::default()
            },
        )
        .await
        .unwrap();

        let waiting = queries.awaiting_capture(None, 10).await.unwrap();
        assert_eq!(waiting.iter().map(|o| o.id).collect::<Vec<_>>(), vec![paid.id, later.id]);

        let first = queries.awaiting_capture(None, 1).await.unwrap();
        assert_eq!(first.iter().map(|o| o.id).collect::<Vec<_>>(), vec![paid.id]);
        let rest = queries.awaiting_capture(Some(paid.id), 1).await.unwrap();
        assert_eq!(rest.iter().map(|o| o.id).collect::<Vec<_>>(), vec![later.id]);
        assert!(queries.awaiting_capture(Some(later.id), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_orders_are_hidden() {
        let (manager, queries, _) = setup();
        let order = manager.create(local(1, 1, 0)).await.unwrap();
        manager.cancel(&[order.id], 1).await.unwrap();
        assert!(queries.search(&SearchSpec::default()).await.unwrap().is_empty());
        assert!(queries.kitchen(1, None).await.unwrap().is_empty());
        assert!(queries.waiter(1).await.unwrap().is_empty());
    }
}
