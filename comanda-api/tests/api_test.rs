use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use comanda_api::{app, AppState};
use comanda_order::MockPaymentProcessor;
use comanda_store::MemoryOrderRepository;

fn test_app() -> (Router, Arc<MockPaymentProcessor>) {
    let processor = Arc::new(MockPaymentProcessor::new());
    let state = AppState::new(Arc::new(MemoryOrderRepository::new()), processor.clone(), "MXN");
    (app(state), processor)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_local_order_flow() {
    let (app, _) = test_app();

    let (status, order) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({
            "type": 1,
            "establishment_id": 1,
            "table_id": 1,
            "employee_id": 1,
            "items": [{ "product_id": 7, "quantity": 2 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], 2);
    assert_eq!(order["total_cents"], 0);
    let order_id = order["id"].as_i64().unwrap();
    let item_id = order["items"][0]["id"].as_i64().unwrap();

    let (_, board) = send(&app, "GET", "/establishments/1/kitchen", None).await;
    assert_eq!(board.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "POST", &format!("/products/{}/ready", item_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, board) = send(&app, "GET", "/establishments/1/kitchen", None).await;
    assert!(board.as_array().unwrap().is_empty());

    let (status, paid) = send(
        &app,
        "POST",
        &format!("/orders/{}/pay/local", order_id),
        Some(json!({ "establishment_id": 1, "method": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], 3);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/orders/{}/complete", order_id),
        Some(json!({ "establishment_id": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "FORBIDDEN");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_delivery_payment_flow() {
    let (app, processor) = test_app();
    processor.set_capture_status("completed");

    let (status, order) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({
            "type": 2,
            "user_id": 42,
            "address_id": "addr-1",
            "total_cents": 15000,
            "items": [{ "product_id": 3, "quantity": 1 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], 1);
    let order_id = order["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/orders/{}/pay/delivery", order_id),
        Some(json!({ "user_id": 42, "establishment_id": 1, "address_id": "addr-1", "method": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "INVALID_METHOD");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/orders/{}/pay/delivery", order_id),
        Some(json!({ "user_id": 42, "establishment_id": 1, "address_id": "addr-1", "method": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reference = body["payment_reference"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let (status, _) = send(&app, "POST", &format!("/payments/{}/capture", reference), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(processor.capture_calls(), 1);

    let (_, order) = send(&app, "GET", &format!("/orders/{}", order_id), None).await;
    assert_eq!(order["status"], 3);
    assert_eq!(order["payment_reference"], reference.as_str());

    let (_, history) = send(&app, "POST", "/users/42/orders", Some(json!({}))).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    let (_, history) = send(&app, "POST", "/users/43/orders", Some(json!({ "users": [42] }))).await;
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_status_is_bad_request() {
    let (app, _) = test_app();
    let (status, body) = send(&app, "POST", "/orders/search", Some(json!({ "statuses": [9] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_cancel_reports_conflict() {
    let (app, _) = test_app();
    let (_, order) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "type": 1, "establishment_id": 1, "table_id": 1, "employee_id": 1 })),
    )
    .await;
    let order_id = order["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/orders/cancel",
        Some(json!({ "order_ids": [order_id, 999], "actor_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["failed"], json!([999]));
    assert_eq!(body["succeeded"], json!([order_id]));

    let (status, _) = send(&app, "GET", &format!("/orders/{}", order_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deliver_not_ready_is_rejected() {
    let (app, _) = test_app();
    let (_, order) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({
            "type": 1,
            "establishment_id": 1,
            "table_id": 1,
            "employee_id": 1,
            "items": [{ "product_id": 7, "quantity": 1 }]
        })),
    )
    .await;
    let item_id = order["items"][0]["id"].as_i64().unwrap();

    let (status, body) = send(&app, "POST", "/products/deliver", Some(json!({ "item_ids": [item_id] }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "INVALID_TRANSITION");
}
