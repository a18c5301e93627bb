use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use refundgate_core::{Entity, Money, OrderId, OrderLineId};

/// A single line item on an order, as the order store reports it.
///
/// `unit_price` is the price at sale time; the refund workflow snapshots it at
/// submit so later catalog edits cannot change a refund's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_id: OrderLineId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Set once a refund for this line completes.
    pub refunded: bool,
}

impl OrderLine {
    pub fn new(
        line_id: OrderLineId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            line_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            refunded: false,
        }
    }

    /// Quantity times unit price; `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// An order as seen from the refund engine's side of the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    order_id: OrderId,
    placed_at: DateTime<Utc>,
    lines: Vec<OrderLine>,
}

impl Order {
    pub fn new(order_id: OrderId, placed_at: DateTime<Utc>, lines: Vec<OrderLine>) -> Self {
        Self {
            order_id,
            placed_at,
            lines,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_id: OrderLineId) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.line_id == line_id)
    }

    pub(crate) fn line_mut(&mut self, line_id: OrderLineId) -> Option<&mut OrderLine> {
        self.lines.iter_mut().find(|line| line.line_id == line_id)
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.order_id
    }
}
