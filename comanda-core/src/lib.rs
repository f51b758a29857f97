pub mod error;
pub mod models;
pub mod payment;
pub mod repository;
pub mod search;

pub use error::{OrderError, OrderResult, ProcessorError, StorageError, StorageResult};
pub use models::{
    ItemId, NewOrder, NewOrderProduct, Order, OrderId, OrderProduct, OrderStatus, OrderType,
    PaymentMethod,
};
pub use payment::PaymentProcessor;
pub use repository::OrderRepository;
pub use search::{OrderPredicate, SearchSpec};

/// Reject ids that cannot have been assigned by storage.
pub fn ensure_id(id: i64, what: &str) -> OrderResult<i64> {
    if id <= 0 {
        return Err(OrderError::InvalidInput(format!("{} must be a positive id, got {}", what, id)));
    }
    Ok(id)
}
