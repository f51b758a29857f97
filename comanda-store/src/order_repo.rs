use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use comanda_core::error::{StorageError, StorageResult};
use comanda_core::models::{
    ItemId, ItemPatch, NewOrderProduct, Order, OrderDraft, OrderId, OrderPatch, OrderProduct, OrderStatus, OrderType,
};
use comanda_core::repository::OrderRepository;
use comanda_core::search::{ItemPredicate, ItemQuery, ItemSelection, OrderPredicate, OrderQuery, Page, SortDirection, SortKey};

const ORDER_COLUMNS: &str = "o.id, o.type_id, o.status_id, o.total_cents, o.payment_reference, \
     o.establishment_id, o.employee_id, o.table_id, o.user_id, o.address_id, \
     o.created_at, o.updated_at, o.cancelled_at, o.cancelled_by";

const ITEM_COLUMNS: &str = "i.id, i.order_id, i.product_id, i.quantity, i.is_ready, i.is_delivered";

/// Postgres-backed order store.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    type_id: i32,
    status_id: i32,
    total_cents: i64,
    payment_reference: Option<String>,
    establishment_id: Option<i64>,
    employee_id: Option<i64>,
    table_id: Option<i64>,
    user_id: Option<i64>,
    address_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    order_id: i64,
    product_id: i64,
    quantity: i32,
    is_ready: bool,
    is_delivered: bool,
}

impl TryFrom<OrderRow> for Order {
    type Error = StorageError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| StorageError::Corrupt { entity: "order", detail };
        let order_type = u32::try_from(row.type_id)
            .ok()
            .and_then(|v| OrderType::try_from(v).ok())
            .ok_or_else(|| corrupt(format!("order {} has type {}", row.id, row.type_id)))?;
        let status = u32::try_from(row.status_id)
            .ok()
            .and_then(|v| OrderStatus::try_from(v).ok())
            .ok_or_else(|| corrupt(format!("order {} has status {}", row.id, row.status_id)))?;

        Ok(Order {
            id: row.id,
            order_type,
            status,
            total_cents: row.total_cents,
            payment_reference: row.payment_reference,
            establishment_id: row.establishment_id,
            employee_id: row.employee_id,
            table_id: row.table_id,
            user_id: row.user_id,
            address_id: row.address_id,
            items: Vec::new(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
        })
    }
}

impl TryFrom<ItemRow> for OrderProduct {
    type Error = StorageError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity).map_err(|_| StorageError::Corrupt {
            entity: "order product",
            detail: format!("item {} has quantity {}", row.id, row.quantity),
        })?;
        Ok(OrderProduct {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity,
            is_ready: row.is_ready,
            is_delivered: row.is_delivered,
        })
    }
}

/// Postgres `numeric_value_out_of_range`.
const OUT_OF_RANGE: &str = "22003";

fn backend(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(OUT_OF_RANGE) {
            return StorageError::OutOfRange(db.message().to_string());
        }
    }
    StorageError::Backend(e.to_string())
}

/// `status_id` column values, kept in step with the migration's CHECK.
fn status_id(status: OrderStatus) -> i32 {
    match status {
        OrderStatus::WithoutPay => 1,
        OrderStatus::Pending => 2,
        OrderStatus::Completed => 3,
    }
}

/// `type_id` column values.
fn type_id(order_type: OrderType) -> i32 {
    match order_type {
        OrderType::Local => 1,
        OrderType::Delivery => 2,
    }
}

fn quantity(item: &NewOrderProduct) -> StorageResult<i32> {
    i32::try_from(item.quantity)
        .map_err(|_| StorageError::Backend(format!("quantity {} out of range", item.quantity)))
}

fn push_order_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &OrderPredicate) {
    match predicate {
        OrderPredicate::IdIn(ids) => {
            qb.push("o.id = ANY(").push_bind(ids.clone()).push(")");
        }
        OrderPredicate::IdAfter(last) => {
            qb.push("o.id > ").push_bind(*last);
        }
        OrderPredicate::StatusIn(statuses) => {
            let values: Vec<i32> = statuses.iter().map(|s| status_id(*s)).collect();
            qb.push("o.status_id = ANY(").push_bind(values).push(")");
        }
        OrderPredicate::StatusNot(status) => {
            qb.push("o.status_id <> ").push_bind(status_id(*status));
        }
        OrderPredicate::TypeIn(types) => {
            let values: Vec<i32> = types.iter().map(|t| type_id(*t)).collect();
            qb.push("o.type_id = ANY(").push_bind(values).push(")");
        }
        OrderPredicate::EstablishmentIn(ids) => {
            qb.push("o.establishment_id = ANY(").push_bind(ids.clone()).push(")");
        }
        OrderPredicate::UserIn(ids) => {
            qb.push("o.user_id = ANY(").push_bind(ids.clone()).push(")");
        }
        OrderPredicate::EmployeeIs(id) => {
            qb.push("o.employee_id = ").push_bind(*id);
        }
        OrderPredicate::TotalAtLeast(min) => {
            qb.push("o.total_cents >= ").push_bind(*min);
        }
        OrderPredicate::TotalAtMost(max) => {
            qb.push("o.total_cents <= ").push_bind(*max);
        }
        OrderPredicate::PaymentReferenceIs(reference) => {
            qb.push("o.payment_reference = ").push_bind(reference.clone());
        }
        OrderPredicate::HasPaymentReference => {
            qb.push("o.payment_reference IS NOT NULL");
        }
        OrderPredicate::NotCancelled => {
            qb.push("o.cancelled_at IS NULL");
        }
    }
}

fn push_item_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &ItemPredicate) {
    match predicate {
        ItemPredicate::IdIn(ids) => {
            qb.push("i.id = ANY(").push_bind(ids.clone()).push(")");
        }
        ItemPredicate::IdAfter(last) => {
            qb.push("i.id > ").push_bind(*last);
        }
        ItemPredicate::OrderIs(order_id) => {
            qb.push("i.order_id = ").push_bind(*order_id);
        }
        ItemPredicate::Ready(ready) => {
            qb.push("i.is_ready = ").push_bind(*ready);
        }
        ItemPredicate::Delivered(delivered) => {
            qb.push("i.is_delivered = ").push_bind(*delivered);
        }
        ItemPredicate::Order(inner) => push_order_predicate(qb, inner),
    }
}

/// Appends `WHERE a AND b ...`; nothing for an empty list.
fn push_where<P>(
    qb: &mut QueryBuilder<'_, Postgres>,
    predicates: &[P],
    push: fn(&mut QueryBuilder<'_, Postgres>, &P),
) {
    let mut separator = " WHERE ";
    for predicate in predicates {
        qb.push(separator);
        push(qb, predicate);
        separator = " AND ";
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: &Page) {
    if page.limit > 0 {
        qb.push(" LIMIT ").push_bind(i64::from(page.limit));
    }
    if page.offset > 0 {
        qb.push(" OFFSET ").push_bind(i64::from(page.offset));
    }
}

fn sort_column(key: SortKey) -> &'static str {
    match key {
        SortKey::CreationTime => "o.created_at",
        SortKey::Price => "o.total_cents",
        SortKey::Establishment => "o.establishment_id",
        SortKey::Status => "o.status_id",
        SortKey::Type => "o.type_id",
    }
}

fn select_orders(query: &OrderQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM orders o", ORDER_COLUMNS));
    push_where(&mut qb, &query.predicates, push_order_predicate);

    qb.push(" ORDER BY ");
    for (key, direction) in &query.sort {
        qb.push(sort_column(*key));
        // Unset columns sort first ascending, matching the in-process store.
        qb.push(match direction {
            SortDirection::Asc => " ASC NULLS FIRST, ",
            SortDirection::Desc => " DESC NULLS LAST, ",
        });
    }
    qb.push("o.id");
    push_page(&mut qb, &query.page);
    qb
}

fn select_items(predicates: &[ItemPredicate], page: &Page) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM order_products i JOIN orders o ON o.id = i.order_id",
        ITEM_COLUMNS
    ));
    push_where(&mut qb, predicates, push_item_predicate);
    qb.push(" ORDER BY i.id");
    push_page(&mut qb, page);
    qb
}

fn update_orders_sql(predicates: &[OrderPredicate], patch: &OrderPatch) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE orders o SET updated_at = now()");
    if let Some(status) = patch.status {
        qb.push(", status_id = ").push_bind(status_id(status));
    }
    if let Some(reference) = &patch.payment_reference {
        qb.push(", payment_reference = ").push_bind(reference.clone());
    }
    if let Some(establishment_id) = patch.establishment_id {
        qb.push(", establishment_id = ").push_bind(establishment_id);
    }
    if let Some(address_id) = &patch.address_id {
        qb.push(", address_id = ").push_bind(address_id.clone());
    }
    if let Some(actor) = patch.cancelled_by {
        qb.push(", cancelled_by = ").push_bind(actor);
    }
    if let Some(at) = patch.cancelled_at {
        qb.push(", cancelled_at = ").push_bind(at);
    }
    push_where(&mut qb, predicates, push_order_predicate);
    qb
}

async fn insert_items(
    conn: &mut sqlx::PgConnection,
    order_id: OrderId,
    items: &[NewOrderProduct],
) -> StorageResult<Vec<OrderProduct>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let quantities = items.iter().map(quantity).collect::<StorageResult<Vec<i32>>>()?;

    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO order_products (order_id, product_id, quantity) ");
    qb.push_values(items.iter().zip(quantities), |mut row, (item, qty)| {
        row.push_bind(order_id).push_bind(item.product_id).push_bind(qty);
    });
    qb.push(" RETURNING id, order_id, product_id, quantity, is_ready, is_delivered");

    let mut rows = qb
        .build_query_as::<ItemRow>()
        .fetch_all(conn)
        .await
        .map_err(backend)?
        .into_iter()
        .map(OrderProduct::try_from)
        .collect::<StorageResult<Vec<_>>>()?;
    rows.sort_by_key(|item| item.id);
    Ok(rows)
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create_order(&self, draft: &OrderDraft) -> StorageResult<Order> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO orders AS o (type_id, status_id, total_cents, establishment_id, employee_id, table_id, user_id, address_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING o.id, o.type_id, o.status_id, o.total_cents, o.payment_reference,
                      o.establishment_id, o.employee_id, o.table_id, o.user_id, o.address_id,
                      o.created_at, o.updated_at, o.cancelled_at, o.cancelled_by
            "#,
        )
        .bind(type_id(draft.order_type))
        .bind(status_id(draft.status))
        .bind(draft.total_cents)
        .bind(draft.establishment_id)
        .bind(draft.employee_id)
        .bind(draft.table_id)
        .bind(draft.user_id)
        .bind(draft.address_id.clone())
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        let mut order = Order::try_from(row)?;
        order.items = insert_items(&mut tx, order.id, &draft.items).await?;

        tx.commit().await.map_err(backend)?;
        debug!("Stored order {} with {} items", order.id, order.items.len());
        Ok(order)
    }

    async fn find_orders(&self, query: &OrderQuery) -> StorageResult<Vec<Order>> {
        let rows = select_orders(query)
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let mut orders = rows.into_iter().map(Order::try_from).collect::<StorageResult<Vec<_>>>()?;

        let item_predicates = match &query.items {
            ItemSelection::None => return Ok(orders),
            ItemSelection::All => Vec::new(),
            ItemSelection::Matching(predicates) => predicates.clone(),
        };
        if orders.is_empty() {
            return Ok(orders);
        }

        let mut predicates = vec![ItemPredicate::Order(OrderPredicate::IdIn(
            orders.iter().map(|o| o.id).collect(),
        ))];
        predicates.extend(item_predicates);

        let mut by_order: HashMap<OrderId, Vec<OrderProduct>> = HashMap::new();
        for row in select_items(&predicates, &Page::unbounded())
            .build_query_as::<ItemRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
        {
            let item = OrderProduct::try_from(row)?;
            by_order.entry(item.order_id).or_default().push(item);
        }
        for order in orders.iter_mut() {
            order.items = by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn find_items(&self, query: &ItemQuery) -> StorageResult<Vec<OrderProduct>> {
        select_items(&query.predicates, &query.page)
            .build_query_as::<ItemRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(OrderProduct::try_from)
            .collect()
    }

    async fn update_orders(&self, predicates: &[OrderPredicate], patch: &OrderPatch) -> StorageResult<u64> {
        let result = update_orders_sql(predicates, patch)
            .build()
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn update_items(&self, ids: &[ItemId], patch: &ItemPatch, require_ready: bool) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE order_products
            SET is_ready = is_ready OR $2, is_delivered = is_delivered OR $3
            WHERE id = ANY($1) AND (is_ready OR NOT $4)
            "#,
        )
        .bind(ids.to_vec())
        .bind(patch.mark_ready)
        .bind(patch.mark_delivered)
        .bind(require_ready)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn append_items(
        &self,
        order_id: OrderId,
        guard: &[OrderPredicate],
        items: &[NewOrderProduct],
        additional_total_cents: i64,
    ) -> StorageResult<Option<Vec<ItemId>>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // The row lock taken here holds until commit, so readers never see
        // the new items without the new total.
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE orders o SET total_cents = total_cents + ");
        qb.push_bind(additional_total_cents);
        qb.push(", updated_at = now()");
        let mut predicates = vec![OrderPredicate::IdIn(vec![order_id])];
        predicates.extend_from_slice(guard);
        push_where(&mut qb, &predicates, push_order_predicate);

        let updated = qb.build().execute(&mut *tx).await.map_err(backend)?.rows_affected();
        if updated == 0 {
            tx.rollback().await.map_err(backend)?;
            return Ok(None);
        }

        let rows = insert_items(&mut tx, order_id, items).await?;
        tx.commit().await.map_err(backend)?;
        Ok(Some(rows.into_iter().map(|item| item.id).collect()))
    }
}
