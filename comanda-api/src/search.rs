use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use comanda_core::models::{EmployeeId, EstablishmentId, ItemId, Order, OrderProduct, UserId};
use comanda_core::SearchSpec;

use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct KitchenParams {
    /// Last item id the board already shows.
    pub last: Option<ItemId>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders/search", post(search_orders))
        .route("/establishments/{id}/orders", post(establishment_orders))
        .route("/establishments/{id}/kitchen", get(kitchen))
        .route("/waiters/{id}/orders", get(waiter_orders))
        .route("/waiters/{id}/orders/pending", get(waiter_pending))
        .route("/users/{id}/orders", post(user_history))
}

pub async fn search_orders(
    State(state): State<AppState>,
    ApiJson(spec): ApiJson<SearchSpec>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.queries.search(&spec).await?))
}

pub async fn establishment_orders(
    State(state): State<AppState>,
    Path(establishment_id): Path<EstablishmentId>,
    ApiJson(spec): ApiJson<SearchSpec>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.queries.establishment_orders(establishment_id, &spec).await?))
}

pub async fn kitchen(
    State(state): State<AppState>,
    Path(establishment_id): Path<EstablishmentId>,
    Query(params): Query<KitchenParams>,
) -> Result<Json<Vec<OrderProduct>>, AppError> {
    Ok(Json(state.queries.kitchen(establishment_id, params.last).await?))
}

pub async fn waiter_orders(
    State(state): State<AppState>,
    Path(employee_id): Path<EmployeeId>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.queries.waiter(employee_id).await?))
}

pub async fn waiter_pending(
    State(state): State<AppState>,
    Path(employee_id): Path<EmployeeId>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.queries.waiter_pending(employee_id).await?))
}

pub async fn user_history(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    ApiJson(spec): ApiJson<SearchSpec>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.queries.user_history(user_id, &spec).await?))
}
