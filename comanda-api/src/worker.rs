use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use comanda_core::models::OrderId;
use comanda_core::OrderError;
use comanda_order::{OrderQueries, PaymentOrchestrator};
use comanda_store::app_config::ReconciliationConfig;

/// Periodically re-confirms captures for authorized delivery orders whose
/// processor callback never arrived.
pub async fn start_reconciliation_worker(
    queries: OrderQueries,
    payments: Arc<PaymentOrchestrator>,
    config: ReconciliationConfig,
) {
    info!(
        "Reconciliation worker started, every {}s, batches of {}",
        config.interval_seconds, config.batch_size
    );
    let mut ticker = interval(Duration::from_secs(config.interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cursor = None;
    loop {
        ticker.tick().await;
        match reconcile_once(&queries, &payments, cursor, config.batch_size).await {
            Ok(sweep) => {
                if sweep.settled > 0 {
                    info!("Reconciliation settled {} payments", sweep.settled);
                }
                cursor = sweep.next;
            }
            Err(e) => error!("Reconciliation sweep failed: {}", e),
        }
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    /// Payment references settled in this sweep.
    pub settled: usize,
    /// Where the next sweep resumes. `None` starts over from the oldest order.
    pub next: Option<OrderId>,
}

/// One sweep over the orders after `after`. Payments that stay unapproved
/// are passed over so the cursor reaches the rest.
pub async fn reconcile_once(
    queries: &OrderQueries,
    payments: &PaymentOrchestrator,
    after: Option<OrderId>,
    batch_size: u32,
) -> Result<Sweep, OrderError> {
    let waiting = queries.awaiting_capture(after, batch_size).await?;
    let next = if batch_size > 0 && waiting.len() >= batch_size as usize {
        waiting.last().map(|order| order.id)
    } else {
        None
    };
    let references: BTreeSet<String> = waiting
        .into_iter()
        .filter_map(|order| order.payment_reference)
        .collect();

    let mut settled = 0;
    for reference in references {
        match payments.confirm_capture(&reference).await {
            Ok(_) => settled += 1,
            // Buyer has not approved yet.
            Err(OrderError::ExternalFailure {
                status: Some(status),
                side_effect_possible: false,
                ..
            }) => debug!("Payment {} still {}", reference, status),
            Err(e) => error!("Could not reconcile payment {}: {}", reference, e),
        }
    }
    Ok(Sweep { settled, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_core::models::{NewOrder, NewOrderProduct, OrderStatus, OrderType, PaymentMethod};
    use comanda_core::OrderRepository;
    use comanda_order::{MockPaymentProcessor, OrderManager};
    use comanda_store::MemoryOrderRepository;

    #[tokio::test]
    async fn test_reconcile_settles_approved_payments() {
        let repo: Arc<dyn OrderRepository> = Arc::new(MemoryOrderRepository::new());
        let processor = Arc::new(MockPaymentProcessor::with_capture_status("PAYER_ACTION_REQUIRED"));
        let orders = OrderManager::new(repo.clone());
        let queries = OrderQueries::new(repo.clone());
        let payments = PaymentOrchestrator::new(repo, processor.clone(), "MXN");

        let order = orders
            .create(NewOrder {
                order_type: Some(OrderType::Delivery),
                user_id: Some(42),
                address_id: Some("addr-1".into()),
                total_cents: 15000,
                items: vec![NewOrderProduct { product_id: 1, quantity: 1 }],
                ..NewOrder::default()
            })
            .await
            .unwrap();
        payments
            .initiate_delivery_payment(order.id, 42, 1, "addr-1", PaymentMethod::Paypal)
            .await
            .unwrap();

        let sweep = reconcile_once(&queries, &payments, None, 10).await.unwrap();
        assert_eq!(sweep, Sweep { settled: 0, next: None });
        assert_eq!(orders.get(order.id).await.unwrap().status, OrderStatus::Pending);

        processor.set_capture_status("COMPLETED");
        assert_eq!(reconcile_once(&queries, &payments, None, 10).await.unwrap().settled, 1);
        assert_eq!(orders.get(order.id).await.unwrap().status, OrderStatus::Completed);
        assert!(queries.awaiting_capture(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unapproved_payments_do_not_starve_the_rest() {
        let repo: Arc<dyn OrderRepository> = Arc::new(MemoryOrderRepository::new());
        let processor = Arc::new(MockPaymentProcessor::new());
        let orders = OrderManager::new(repo.clone());
        let queries = OrderQueries::new(repo.clone());
        let payments = PaymentOrchestrator::new(repo, processor.clone(), "MXN");

        let mut placed = Vec::new();
        for user_id in [42, 43] {
            let order = orders
                .create(NewOrder {
                    order_type: Some(OrderType::Delivery),
                    user_id: Some(user_id),
                    address_id: Some("addr-1".into()),
                    total_cents: 15000,
                    items: vec![NewOrderProduct { product_id: 1, quantity: 1 }],
                    ..NewOrder::default()
                })
                .await
                .unwrap();
            let reference = payments
                .initiate_delivery_payment(order.id, user_id, 1, "addr-1", PaymentMethod::Paypal)
                .await
                .unwrap();
            placed.push((order.id, reference));
        }
        let (stuck, stuck_reference) = &placed[0];
        let (approved, _) = &placed[1];
        processor.set_capture_status_for(stuck_reference, "PAYER_ACTION_REQUIRED");

        let first = reconcile_once(&queries, &payments, None, 1).await.unwrap();
        assert_eq!(first, Sweep { settled: 0, next: Some(*stuck) });
        assert_eq!(orders.get(*approved).await.unwrap().status, OrderStatus::Pending);

        let second = reconcile_once(&queries, &payments, first.next, 1).await.unwrap();
        assert_eq!(second.settled, 1);
        assert_eq!(orders.get(*approved).await.unwrap().status, OrderStatus::Completed);

        // Past the end, the next sweep wraps to the oldest order.
        let third = reconcile_once(&queries, &payments, second.next, 1).await.unwrap();
        assert_eq!(third, Sweep { settled: 0, next: None });
        assert_eq!(orders.get(*stuck).await.unwrap().status, OrderStatus::Pending);
    }
}
