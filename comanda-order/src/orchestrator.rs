use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};
use uuid::Uuid;

use comanda_core::models::{EstablishmentId, OrderId, OrderPatch, OrderStatus, OrderType, PaymentMethod, UserId};
use comanda_core::payment::{is_capture_completed, PaymentProcessor, CAPTURE_COMPLETED};
use comanda_core::search::{OrderPredicate, OrderQuery};
use comanda_core::{ensure_id, Order, OrderError, OrderRepository, OrderResult, ProcessorError};

use crate::lifecycle::{self, Transition};
use crate::manager::OrderManager;

/// Coordinates the two-phase processor payment (authorize, then capture)
/// with persisted order state.
pub struct PaymentOrchestrator {
    repo: Arc<dyn OrderRepository>,
    processor: Arc<dyn PaymentProcessor>,
    orders: OrderManager,
    currency: String,
}

impl PaymentOrchestrator {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        processor: Arc<dyn PaymentProcessor>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            orders: OrderManager::new(repo.clone()),
            repo,
            processor,
            currency: currency.into(),
        }
    }

    /// Authorize the order's total with the processor and record the
    /// returned reference, moving the order to `Pending`.
    ///
    /// A failed authorization writes nothing. A failed write after a
    /// successful authorization leaves an orphaned authorization, reported as
    /// `ExternalFailure` with `side_effect_possible` and the reference.
    pub async fn initiate_delivery_payment(
        &self,
        order_id: OrderId,
        user_id: UserId,
        establishment_id: EstablishmentId,
        address_id: &str,
        method: PaymentMethod,
    ) -> OrderResult<String> {
        if method != PaymentMethod::Paypal {
            return Err(OrderError::InvalidMethod {
                method,
                expected: PaymentMethod::Paypal,
            });
        }
        ensure_id(order_id, "order_id")?;
        ensure_id(user_id, "user_id")?;
        ensure_id(establishment_id, "establishment_id")?;
        if address_id.trim().is_empty() {
            return Err(OrderError::InvalidInput("address is required".into()));
        }

        // Scoped to the owner: another user's order reads as missing.
        let order = self.owned_order(order_id, user_id).await?;
        if order.order_type != OrderType::Delivery {
            return Err(OrderError::invalid_transition(order.status, OrderStatus::Pending));
        }
        let next = lifecycle::next_status(order.order_type, order.status, Transition::InitiatePayment)?;
        if order.total_cents <= 0 {
            return Err(OrderError::InvalidInput(format!(
                "order {} has no payable total",
                order_id
            )));
        }

        let reference = self.processor.authorize(order.total_cents, &self.currency).await.map_err(|e| {
            warn!("Authorization of order {} failed: {}", order_id, e);
            OrderError::from(e)
        })?;

        let patch = OrderPatch {
            status: Some(next),
            payment_reference: Some(reference.clone()),
            establishment_id: Some(establishment_id),
            address_id: Some(address_id.to_string()),
            ..OrderPatch::default()
        };
        let guard = [
            OrderPredicate::IdIn(vec![order_id]),
            OrderPredicate::UserIn(vec![user_id]),
            OrderPredicate::StatusIn(vec![OrderStatus::WithoutPay, OrderStatus::Pending]),
            OrderPredicate::NotCancelled,
        ];
        match self.repo.update_orders(&guard, &patch).await {
            Ok(1) => {
                info!("Order {} authorized with payment {}", order_id, reference);
                Ok(reference)
            }
            Ok(_) => Err(orphaned(order_id, reference, "order changed before the payment was recorded")),
            Err(e) => Err(orphaned(order_id, reference, &e.to_string())),
        }
    }

    /// Cash settlement of a local order, authoritative and immediate.
    pub async fn initiate_local_payment(
        &self,
        order_id: OrderId,
        establishment_id: EstablishmentId,
        method: PaymentMethod,
    ) -> OrderResult<Order> {
        if method != PaymentMethod::Cash {
            return Err(OrderError::InvalidMethod {
                method,
                expected: PaymentMethod::Cash,
            });
        }
        self.orders.complete_local(order_id, establishment_id).await
    }

    /// Capture a previously authorized payment and complete every order that
    /// carries its reference.
    ///
    /// Re-confirming a settled reference returns success without calling the
    /// processor or writing again. A non-success processor status is
    /// returned as `ExternalFailure` carrying the raw status, and local state
    /// is left `Pending` so the call can be repeated.
    pub async fn confirm_capture(&self, reference: &str) -> OrderResult<String> {
        if reference.trim().is_empty() {
            return Err(OrderError::InvalidInput("payment reference is required".into()));
        }

        let orders = self
            .repo
            .find_orders(&OrderQuery::filter(vec![
                OrderPredicate::PaymentReferenceIs(reference.to_string()),
                OrderPredicate::NotCancelled,
            ]))
            .await?;
        if orders.is_empty() {
            return Err(OrderError::NotFound(format!("payment {}", reference)));
        }
        if orders.iter().all(|o| o.status == OrderStatus::Completed) {
            info!("Payment {} already settled", reference);
            return Ok(CAPTURE_COMPLETED.to_string());
        }
        for order in orders.iter().filter(|o| o.status != OrderStatus::Completed) {
            lifecycle::next_status(order.order_type, order.status, Transition::ConfirmCapture)?;
        }

        let status = self.processor.capture(reference).await.map_err(|e| {
            warn!("Capture of payment {} failed: {}", reference, e);
            OrderError::ExternalFailure {
                message: e.to_string(),
                status: None,
                reference: Some(reference.to_string()),
                side_effect_possible: false,
            }
        })?;

        if !is_capture_completed(&status) {
            warn!("Payment {} returned status {}", reference, status);
            return Err(OrderError::ExternalFailure {
                message: format!("payment status is {}", status),
                status: Some(status),
                reference: Some(reference.to_string()),
                side_effect_possible: false,
            });
        }

        let guard = [
            OrderPredicate::PaymentReferenceIs(reference.to_string()),
            OrderPredicate::StatusIn(vec![OrderStatus::Pending]),
            OrderPredicate::NotCancelled,
        ];
        match self.repo.update_orders(&guard, &OrderPatch::status(OrderStatus::Completed)).await {
            Ok(0) => {
                // Nothing matched the guard any more: either a concurrent
                // confirmation got there first, or the reference was replaced.
                if self.reference_settled(reference).await? {
                    info!("Payment {} settled by a concurrent confirmation", reference);
                    Ok(status)
                } else {
                    Err(unrecorded_capture(reference, status, "no order carries the reference any more"))
                }
            }
            Ok(updated) => {
                info!("Payment {} captured, {} orders completed", reference, updated);
                Ok(status)
            }
            Err(e) => Err(unrecorded_capture(reference, status, &e.to_string())),
        }
    }

    async fn reference_settled(&self, reference: &str) -> OrderResult<bool> {
        let orders = self
            .repo
            .find_orders(&OrderQuery::filter(vec![
                OrderPredicate::PaymentReferenceIs(reference.to_string()),
                OrderPredicate::NotCancelled,
            ]))
            .await?;
        Ok(!orders.is_empty() && orders.iter().all(|o| o.status == OrderStatus::Completed))
    }

    async fn owned_order(&self, order_id: OrderId, user_id: UserId) -> OrderResult<Order> {
        self.repo
            .find_orders(&OrderQuery::filter(vec![
                OrderPredicate::IdIn(vec![order_id]),
                OrderPredicate::UserIn(vec![user_id]),
                OrderPredicate::NotCancelled,
            ]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrderError::NotFound(format!("order {} for user {}", order_id, user_id)))
    }
}

fn orphaned(order_id: OrderId, reference: String, cause: &str) -> OrderError {
    error!(
        "Orphaned authorization {} for order {}: {}. Reconcile manually.",
        reference, order_id, cause
    );
    OrderError::ExternalFailure {
        message: format!("authorization {} not recorded: {}", reference, cause),
        status: None,
        reference: Some(reference),
        side_effect_possible: true,
    }
}

fn unrecorded_capture(reference: &str, status: String, cause: &str) -> OrderError {
    error!(
        "Payment {} captured by the processor but not recorded: {}. Reconcile manually.",
        reference, cause
    );
    OrderError::ExternalFailure {
        message: format!("capture not recorded: {}", cause),
        status: Some(status),
        reference: Some(reference.to_string()),
        side_effect_possible: true,
    }
}

/// In-process processor for tests and sandbox runs.
pub struct MockPaymentProcessor {
    capture_status: Mutex<String>,
    capture_overrides: Mutex<HashMap<String, String>>,
    authorized: Mutex<HashMap<String, i64>>,
    fail_authorize: AtomicBool,
    fail_capture: AtomicBool,
    authorize_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::with_capture_status(CAPTURE_COMPLETED)
    }

    pub fn with_capture_status(status: &str) -> Self {
        Self {
            capture_status: Mutex::new(status.to_string()),
            capture_overrides: Mutex::new(HashMap::new()),
            authorized: Mutex::new(HashMap::new()),
            fail_authorize: AtomicBool::new(false),
            fail_capture: AtomicBool::new(false),
            authorize_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_capture_status(&self, status: &str) {
        if let Ok(mut current) = self.capture_status.lock() {
            *current = status.to_string();
        }
    }

    /// Capture status for one reference, taking precedence over the default.
    pub fn set_capture_status_for(&self, reference: &str, status: &str) {
        if let Ok(mut overrides) = self.capture_overrides.lock() {
            overrides.insert(reference.to_string(), status.to_string());
        }
    }

    pub fn fail_authorize(&self, fail: bool) {
        self.fail_authorize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn authorized_amount(&self, reference: &str) -> Option<i64> {
        self.authorized.lock().ok()?.get(reference).copied()
    }
}

impl Default for MockPaymentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn authorize(&self, amount_cents: i64, _currency: &str) -> Result<String, ProcessorError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transport("simulated authorization outage".into()));
        }
        let reference = format!("MOCK-{}", Uuid::new_v4().simple().to_string().to_uppercase());
        self.authorized
            .lock()
            .map_err(|_| ProcessorError::InvalidResponse("mock state poisoned".into()))?
            .insert(reference.clone(), amount_cents);
        Ok(reference)
    }

    async fn capture(&self, reference: &str) -> Result<String, ProcessorError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(ProcessorError::Transport("simulated capture outage".into()));
        }
        let known = self
            .authorized
            .lock()
            .map_err(|_| ProcessorError::InvalidResponse("mock state poisoned".into()))?
            .contains_key(reference);
        if !known {
            return Err(ProcessorError::Rejected {
                status: 404,
                body: format!("unknown payment {}", reference),
            });
        }
        let overridden = self
            .capture_overrides
            .lock()
            .map_err(|_| ProcessorError::InvalidResponse("mock state poisoned".into()))?
            .get(reference)
            .cloned();
        if let Some(status) = overridden {
            return Ok(status);
        }
        self.capture_status
            .lock()
            .map(|status| status.clone())
            .map_err(|_| ProcessorError::InvalidResponse("mock state poisoned".into()))
    }
}
