use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use comanda_core::models::{EstablishmentId, ItemId, NewOrder, NewOrderProduct, Order, OrderId, OrderProduct, UserId};

use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddItemsRequest {
    pub items: Vec<NewOrderProduct>,
    #[serde(default)]
    pub additional_total_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct AddItemsResponse {
    pub item_ids: Vec<ItemId>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub order_ids: Vec<OrderId>,
    pub actor_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: Vec<OrderId>,
}

#[derive(Debug, Deserialize)]
pub struct DeliverRequest {
    pub item_ids: Vec<ItemId>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub establishment_id: EstablishmentId,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/cancel", post(cancel_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/products", get(list_products).post(add_products))
        .route("/orders/{id}/complete", post(complete_order))
        .route("/products/deliver", post(deliver_products))
        .route("/products/{id}/ready", post(mark_ready))
}

pub async fn create_order(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewOrder>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.orders.create(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get(order_id).await?))
}

pub async fn list_products(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<OrderProduct>>, AppError> {
    Ok(Json(state.orders.products(order_id).await?))
}

pub async fn add_products(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    ApiJson(req): ApiJson<AddItemsRequest>,
) -> Result<Json<AddItemsResponse>, AppError> {
    let item_ids = state
        .orders
        .add_line_items(order_id, req.items, req.additional_total_cents)
        .await?;
    Ok(Json(AddItemsResponse { item_ids }))
}

pub async fn cancel_orders(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.orders.cancel(&req.order_ids, req.actor_id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn complete_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    ApiJson(req): ApiJson<CompleteRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.complete_local(order_id, req.establishment_id).await?))
}

pub async fn mark_ready(
    State(state): State<AppState>,
    Path(item_id): Path<ItemId>,
) -> Result<StatusCode, AppError> {
    state.orders.mark_product_ready(item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deliver_products(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeliverRequest>,
) -> Result<StatusCode, AppError> {
    state.orders.mark_products_delivered(&req.item_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}
