use std::sync::Arc;

use comanda_core::{OrderRepository, PaymentProcessor};
use comanda_order::{OrderManager, OrderQueries, PaymentOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderManager,
    pub payments: Arc<PaymentOrchestrator>,
    pub queries: OrderQueries,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        processor: Arc<dyn PaymentProcessor>,
        currency: &str,
    ) -> Self {
        Self {
            orders: OrderManager::new(repo.clone()),
            payments: Arc::new(PaymentOrchestrator::new(repo.clone(), processor, currency)),
            queries: OrderQueries::new(repo),
        }
    }
}
