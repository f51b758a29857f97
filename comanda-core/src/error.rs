use crate::models::{OrderId, OrderStatus, PaymentMethod};

/// Failures raised by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored row is not a valid {entity}: {detail}")]
    Corrupt { entity: &'static str, detail: String },
    /// A write would push a column past its range. Nothing was written.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// Failures raised by the external payment processor adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("payment processor unreachable: {0}")]
    Transport(String),
    #[error("payment processor rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected payment processor response: {0}")]
    InvalidResponse(String),
}

/// Error taxonomy surfaced by every order and payment operation.
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid payment method {method:?}, expected {expected:?}")]
    InvalidMethod {
        method: PaymentMethod,
        expected: PaymentMethod,
    },

    #[error("Orders {failed:?} could not be {action}")]
    Conflict {
        action: &'static str,
        failed: Vec<OrderId>,
        succeeded: Vec<OrderId>,
    },

    #[error("Payment processor failure: {message}")]
    ExternalFailure {
        message: String,
        /// Raw processor status when the processor answered with a non-success status.
        status: Option<String>,
        reference: Option<String>,
        /// The processor may already have acted (funds reserved or captured).
        side_effect_possible: bool,
    },

    #[error(transparent)]
    Storage(StorageError),
}

impl OrderError {
    pub fn invalid_transition(from: OrderStatus, to: OrderStatus) -> Self {
        OrderError::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// Retryable kinds originate outside the core and may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::ExternalFailure { .. } | OrderError::Storage(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::InvalidInput(_) => "INVALID_INPUT",
            OrderError::InvalidOrder(_) => "INVALID_ORDER",
            OrderError::NotFound(_) => "NOT_FOUND",
            OrderError::Forbidden(_) => "FORBIDDEN",
            OrderError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrderError::InvalidMethod { .. } => "INVALID_METHOD",
            OrderError::Conflict { .. } => "CONFLICT",
            OrderError::ExternalFailure { .. } => "EXTERNAL_FAILURE",
            OrderError::Storage(_) => "STORAGE",
        }
    }
}

impl From<ProcessorError> for OrderError {
    /// A processor call that failed outright never left local state behind.
    fn from(err: ProcessorError) -> Self {
        OrderError::ExternalFailure {
            message: err.to_string(),
            status: None,
            reference: None,
            side_effect_possible: false,
        }
    }
}

impl From<StorageError> for OrderError {
    /// Range violations are caller input, not backend faults.
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::OutOfRange(detail) => OrderError::InvalidInput(detail),
            other => OrderError::Storage(other),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
pub type StorageResult<T> = Result<T, StorageError>;
