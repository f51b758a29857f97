//! Order state machine.
//!
//! Delivery: `WithoutPay -> Pending -> Completed`, where `Pending` is entered
//! by initiating a processor payment and `Completed` only by a confirmed
//! capture. Local: created `Pending`, completed only by local settlement.
//! `Completed` is terminal.

use comanda_core::models::{NewOrder, OrderDraft, OrderStatus, OrderType};
use comanda_core::{ensure_id, OrderError, OrderResult};

/// Actions that move an order between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Authorization requested at the external processor.
    InitiatePayment,
    /// Cash settlement or explicit local-pay action.
    SettleLocally,
    /// Processor confirmed the capture.
    ConfirmCapture,
}

/// Compute the status `transition` leads to, or reject it.
pub fn next_status(
    order_type: OrderType,
    current: OrderStatus,
    transition: Transition,
) -> OrderResult<OrderStatus> {
    use OrderStatus::*;

    let next = match (order_type, current, transition) {
        // Re-initiating replaces an abandoned authorization.
        (OrderType::Delivery, WithoutPay | Pending, Transition::InitiatePayment) => Some(Pending),
        (OrderType::Delivery, Pending, Transition::ConfirmCapture) => Some(Completed),
        (OrderType::Local, Pending, Transition::SettleLocally) => Some(Completed),
        _ => None,
    };

    next.ok_or_else(|| OrderError::invalid_transition(current, attempted_target(transition)))
}

fn attempted_target(transition: Transition) -> OrderStatus {
    match transition {
        Transition::InitiatePayment => OrderStatus::Pending,
        Transition::SettleLocally | Transition::ConfirmCapture => OrderStatus::Completed,
    }
}

/// Every transition legal from `current`, with the status it leads to.
pub fn allowed_transitions(order_type: OrderType, current: OrderStatus) -> Vec<(Transition, OrderStatus)> {
    [
        Transition::InitiatePayment,
        Transition::SettleLocally,
        Transition::ConfirmCapture,
    ]
    .into_iter()
    .filter_map(|t| next_status(order_type, current, t).ok().map(|s| (t, s)))
    .collect()
}

/// Orders can be retired until they complete.
pub fn can_cancel(status: OrderStatus) -> bool {
    !status.is_terminal()
}

/// Statuses in which line items may still be appended. A delivery order
/// stops accepting items once payment was initiated so the authorized amount
/// cannot drift from its total.
pub fn appendable_statuses(order_type: OrderType) -> &'static [OrderStatus] {
    match order_type {
        OrderType::Local => &[OrderStatus::Pending],
        OrderType::Delivery => &[OrderStatus::WithoutPay],
    }
}

/// Validate a creation request into a draft in its initial status.
pub fn draft(request: NewOrder) -> OrderResult<OrderDraft> {
    let order_type = request
        .order_type
        .ok_or_else(|| OrderError::InvalidOrder("order type is required".into()))?;

    if request.total_cents < 0 {
        return Err(OrderError::InvalidInput(format!(
            "total must not be negative, got {}",
            request.total_cents
        )));
    }
    for item in &request.items {
        ensure_id(item.product_id, "product_id")?;
        if item.quantity == 0 {
            return Err(OrderError::InvalidInput(format!(
                "quantity for product {} must be positive",
                item.product_id
            )));
        }
    }

    let draft = match order_type {
        OrderType::Local => {
            let table_id = request
                .table_id
                .ok_or_else(|| OrderError::InvalidOrder("local orders require a table".into()))?;
            let employee_id = request
                .employee_id
                .ok_or_else(|| OrderError::InvalidOrder("local orders require an employee".into()))?;
            let establishment_id = request.establishment_id.ok_or_else(|| {
                OrderError::InvalidOrder("local orders require an establishment".into())
            })?;
            OrderDraft {
                order_type,
                status: order_type.initial_status(),
                total_cents: request.total_cents,
                establishment_id: Some(ensure_id(establishment_id, "establishment_id")?),
                employee_id: Some(ensure_id(employee_id, "employee_id")?),
                table_id: Some(ensure_id(table_id, "table_id")?),
                user_id: None,
                address_id: None,
                items: request.items,
            }
        }
        OrderType::Delivery => {
            let address_id = request
                .address_id
                .filter(|a| !a.trim().is_empty())
                .ok_or_else(|| OrderError::InvalidOrder("delivery orders require an address".into()))?;
            let user_id = request
                .user_id
                .ok_or_else(|| OrderError::InvalidOrder("delivery orders require a user".into()))?;
            if request.items.is_empty() {
                return Err(OrderError::InvalidOrder(
                    "delivery orders require at least one line item".into(),
                ));
            }
            let establishment_id = request
                .establishment_id
                .map(|id| ensure_id(id, "establishment_id"))
                .transpose()?;
            OrderDraft {
                order_type,
                status: order_type.initial_status(),
                total_cents: request.total_cents,
                establishment_id,
                employee_id: None,
                table_id: None,
                user_id: Some(ensure_id(user_id, "user_id")?),
                address_id: Some(address_id),
                items: request.items,
            }
        }
    };

    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_core::models::NewOrderProduct;

    fn local_request() -> NewOrder {
        NewOrder {
            order_type: Some(OrderType::Local),
            establishment_id: Some(1),
            employee_id: Some(1),
            table_id: Some(1),
            items: vec![NewOrderProduct { product_id: 7, quantity: 2 }],
            ..NewOrder::default()
        }
    }

    #[test]
    fn test_delivery_path() {
        let s = next_status(OrderType::Delivery, OrderStatus::WithoutPay, Transition::InitiatePayment).unwrap();
        assert_eq!(s, OrderStatus::Pending);
        let s = next_status(OrderType::Delivery, s, Transition::ConfirmCapture).unwrap();
        assert_eq!(s, OrderStatus::Completed);
    }

    #[test]
    fn test_delivery_cannot_skip_pending() {
        let result = next_status(OrderType::Delivery, OrderStatus::WithoutPay, Transition::ConfirmCapture);
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_delivery_cannot_settle_locally() {
        assert!(next_status(OrderType::Delivery, OrderStatus::Pending, Transition::SettleLocally).is_err());
    }

    #[test]
    fn test_local_never_uses_processor() {
        assert!(next_status(OrderType::Local, OrderStatus::Pending, Transition::InitiatePayment).is_err());
        assert!(next_status(OrderType::Local, OrderStatus::Pending, Transition::ConfirmCapture).is_err());
        assert_eq!(
            next_status(OrderType::Local, OrderStatus::Pending, Transition::SettleLocally).unwrap(),
            OrderStatus::Completed
        );
    }

    #[test]
    fn test_completed_is_terminal() {
        for order_type in [OrderType::Local, OrderType::Delivery] {
            assert!(allowed_transitions(order_type, OrderStatus::Completed).is_empty());
        }
        assert!(!can_cancel(OrderStatus::Completed));
        assert!(can_cancel(OrderStatus::WithoutPay));
    }

    #[test]
    fn test_allowed_transitions_from_pending_delivery() {
        let allowed = allowed_transitions(OrderType::Delivery, OrderStatus::Pending);
        assert_eq!(
            allowed,
            vec![
                (Transition::InitiatePayment, OrderStatus::Pending),
                (Transition::ConfirmCapture, OrderStatus::Completed),
            ]
        );
    }

    #[test]
    fn test_local_draft_starts_pending() {
        let draft = draft(local_request()).unwrap();
        assert_eq!(draft.status, OrderStatus::Pending);
        assert_eq!(draft.table_id, Some(1));
        assert_eq!(draft.user_id, None);
    }

    #[test]
    fn test_local_draft_allows_no_items() {
        let mut req = local_request();
        req.items.clear();
        assert!(draft(req).is_ok());
    }

    #[test]
    fn test_local_draft_requires_table() {
        let mut req = local_request();
        req.table_id = None;
        assert!(matches!(draft(req), Err(OrderError::InvalidOrder(_))));
    }

    #[test]
    fn test_delivery_draft_requires_address_and_items() {
        let req = NewOrder {
            order_type: Some(OrderType::Delivery),
            user_id: Some(42),
            address_id: Some("  ".into()),
            items: vec![NewOrderProduct { product_id: 1, quantity: 1 }],
            ..NewOrder::default()
        };
        assert!(matches!(draft(req.clone()), Err(OrderError::InvalidOrder(_))));

        let req = NewOrder {
            address_id: Some("addr-9".into()),
            items: vec![],
            ..req
        };
        assert!(matches!(draft(req), Err(OrderError::InvalidOrder(_))));
    }

    #[test]
    fn test_delivery_draft_starts_without_pay() {
        let req = NewOrder {
            order_type: Some(OrderType::Delivery),
            user_id: Some(42),
            address_id: Some("addr-9".into()),
            table_id: Some(3),
            total_cents: 15000,
            items: vec![NewOrderProduct { product_id: 1, quantity: 1 }],
            ..NewOrder::default()
        };
        let draft = draft(req).unwrap();
        assert_eq!(draft.status, OrderStatus::WithoutPay);
        assert_eq!(draft.table_id, None);
        assert_eq!(draft.establishment_id, None);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut req = local_request();
        req.items[0].quantity = 0;
        assert!(matches!(draft(req), Err(OrderError::InvalidInput(_))));
    }
}
