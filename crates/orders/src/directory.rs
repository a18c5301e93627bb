use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use refundgate_core::{OrderId, OrderLineId};

use crate::order::Order;

/// Read-side port to the external order store.
///
/// The workflow only ever asks two things of it: "show me this order" at
/// submit time, and "remember that this line was refunded" once a refund
/// completes. Everything else about orders stays on the other side of the
/// boundary.
pub trait OrderDirectory: Send + Sync {
    fn find_order(&self, order_id: OrderId) -> Option<Order>;

    /// Record that a line item has been fully refunded.
    ///
    /// Returns `false` when the order or line is unknown; callers treat this
    /// as a logged inconsistency, never as a workflow failure.
    fn mark_line_refunded(&self, order_id: OrderId, line_id: OrderLineId) -> bool;
}

impl<D> OrderDirectory for Arc<D>
where
    D: OrderDirectory + ?Sized,
{
    fn find_order(&self, order_id: OrderId) -> Option<Order> {
        (**self).find_order(order_id)
    }

    fn mark_line_refunded(&self, order_id: OrderId, line_id: OrderLineId) -> bool {
        (**self).mark_line_refunded(order_id, line_id)
    }
}

/// In-memory directory for dev and tests.
#[derive(Debug, Default)]
pub struct InMemoryOrderDirectory {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        if let Ok(mut orders) = self.orders.write() {
            orders.insert(order.order_id(), order);
        }
    }
}

impl OrderDirectory for InMemoryOrderDirectory {
    fn find_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders
            .read()
            .ok()
            .and_then(|orders| orders.get(&order_id).cloned())
    }

    fn mark_line_refunded(&self, order_id: OrderId, line_id: OrderLineId) -> bool {
        let Ok(mut orders) = self.orders.write() else {
            return false;
        };
        let Some(order) = orders.get_mut(&order_id) else {
            return false;
        };
        match order.line_mut(line_id) {
            Some(line) => {
                line.refunded = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderLine;
    use chrono::Utc;
    use refundgate_core::Money;

    fn sample_order(line_id: OrderLineId) -> Order {
        Order::new(
            OrderId::new(),
            Utc::now(),
            vec![OrderLine::new(line_id, "Comic Sleeve", 2, Money::from_minor_units(1250))],
        )
    }

    #[test]
    fn finds_inserted_orders() {
        let directory = InMemoryOrderDirectory::new();
        let line_id = OrderLineId::new();
        let order = sample_order(line_id);
        let order_id = order.order_id();
        directory.insert(order);

        let found = directory.find_order(order_id).unwrap();
        assert_eq!(found.order_id(), order_id);
        assert!(directory.find_order(OrderId::new()).is_none());
    }

    #[test]
    fn marks_lines_refunded() {
        let directory = InMemoryOrderDirectory::new();
        let line_id = OrderLineId::new();
        let order = sample_order(line_id);
        let order_id = order.order_id();
        directory.insert(order);

        assert!(directory.mark_line_refunded(order_id, line_id));
        let found = directory.find_order(order_id).unwrap();
        assert!(found.line(line_id).unwrap().refunded);
    }

    #[test]
    fn mark_refunded_reports_unknown_targets() {
        let directory = InMemoryOrderDirectory::new();
        let line_id = OrderLineId::new();
        let order = sample_order(line_id);
        let order_id = order.order_id();
        directory.insert(order);

        assert!(!directory.mark_line_refunded(OrderId::new(), line_id));
        assert!(!directory.mark_line_refunded(order_id, OrderLineId::new()));
    }
}
