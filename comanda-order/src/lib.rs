pub mod lifecycle;
pub mod manager;
pub mod orchestrator;
pub mod queries;

pub use lifecycle::Transition;
pub use manager::OrderManager;
pub use orchestrator::{MockPaymentProcessor, PaymentOrchestrator};
pub use queries::{OrderQueries, QueryBuilder};
