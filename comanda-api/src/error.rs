use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use comanda_core::OrderError;

#[derive(Debug)]
pub enum AppError {
    Order(OrderError),
    BadRequest(String),
}

/// `Json` whose rejections render through [`AppError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        AppError::Order(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

fn status_of(err: &OrderError) -> StatusCode {
    match err {
        OrderError::InvalidInput(_) | OrderError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        OrderError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderError::Forbidden(_) => StatusCode::FORBIDDEN,
        OrderError::Conflict { .. } => StatusCode::CONFLICT,
        OrderError::InvalidTransition { .. } | OrderError::InvalidMethod { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OrderError::ExternalFailure { .. } => StatusCode::BAD_GATEWAY,
        OrderError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => {
                let body = json!({ "error": msg, "kind": "INVALID_INPUT", "retryable": false });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            AppError::Order(err) => err,
        };

        let status = status_of(&err);
        let message = match &err {
            OrderError::Storage(inner) => {
                tracing::error!("Internal Server Error: {}", inner);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": message,
            "kind": err.kind(),
            "retryable": err.is_retryable(),
        });
        if let Value::Object(fields) = &mut body {
            match &err {
                OrderError::Conflict { failed, succeeded, .. } => {
                    fields.insert("failed".into(), json!(failed));
                    fields.insert("succeeded".into(), json!(succeeded));
                }
                OrderError::ExternalFailure {
                    status,
                    reference,
                    side_effect_possible,
                    ..
                } => {
                    fields.insert("processor_status".into(), json!(status));
                    fields.insert("reference".into(), json!(reference));
                    fields.insert("side_effect_possible".into(), json!(side_effect_possible));
                }
                _ => {}
            }
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_core::StorageError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&OrderError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(&OrderError::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(&OrderError::Conflict {
                action: "cancelled",
                failed: vec![1],
                succeeded: vec![]
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&OrderError::Storage(StorageError::Backend("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_external_failure_response() {
        let response = AppError::from(OrderError::ExternalFailure {
            message: "not recorded".into(),
            status: None,
            reference: Some("PAY-1".into()),
            side_effect_possible: true,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
