use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use comanda_core::models::{EstablishmentId, Order, OrderId, PaymentMethod, UserId};

use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeliveryPaymentRequest {
    pub user_id: UserId,
    pub establishment_id: EstablishmentId,
    pub address_id: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct DeliveryPaymentResponse {
    pub payment_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct LocalPaymentRequest {
    pub establishment_id: EstablishmentId,
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub status: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/pay/delivery", post(pay_delivery))
        .route("/orders/{id}/pay/local", post(pay_local))
        .route("/payments/{reference}/capture", post(capture_payment))
}

pub async fn pay_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    ApiJson(req): ApiJson<DeliveryPaymentRequest>,
) -> Result<Json<DeliveryPaymentResponse>, AppError> {
    let payment_reference = state
        .payments
        .initiate_delivery_payment(order_id, req.user_id, req.establishment_id, &req.address_id, req.method)
        .await?;
    Ok(Json(DeliveryPaymentResponse { payment_reference }))
}

pub async fn pay_local(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    ApiJson(req): ApiJson<LocalPaymentRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .payments
        .initiate_local_payment(order_id, req.establishment_id, req.method)
        .await?;
    Ok(Json(order))
}

/// Processor callback once the buyer approved the payment.
pub async fn capture_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<CaptureResponse>, AppError> {
    let status = state.payments.confirm_capture(&reference).await?;
    Ok(Json(CaptureResponse { status }))
}
