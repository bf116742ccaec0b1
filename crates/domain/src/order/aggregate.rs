//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderLine, OrderStatus};

/// Order aggregate root.
///
/// The total amount is always derived from the lines and is never supplied
/// by the caller. Only the saga moves an order through its statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    status: OrderStatus,
    total_amount: Money,
    lines: Vec<OrderLine>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new `Pending` order for a user.
    ///
    /// Rejects empty orders, zero quantities, and negative prices.
    pub fn new(user_id: UserId, lines: Vec<OrderLine>) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        for line in &lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_code: line.product_code.to_string(),
                    quantity: line.quantity,
                });
            }
            if line.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_code: line.product_code.to_string(),
                    price: line.unit_price.cents(),
                });
            }
        }

        let total_amount = Self::compute_total(&lines)?;
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            user_id,
            status: OrderStatus::Pending,
            total_amount,
            lines,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from persisted state.
    ///
    /// The total is recomputed from the lines rather than trusted.
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        status: OrderStatus,
        lines: Vec<OrderLine>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let total_amount = Self::compute_total(&lines)?;
        Ok(Self {
            id,
            user_id,
            status,
            total_amount,
            lines,
            created_at,
            updated_at,
        })
    }

    fn compute_total(lines: &[OrderLine]) -> Result<Money, OrderError> {
        lines.iter().try_fold(Money::zero(), |total, line| {
            line.line_total()
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or(OrderError::TotalOverflow)
        })
    }
}

// Query methods
impl Order {
    /// Returns the order ID.
    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Returns the owning user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the derived total amount.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Returns the order lines in the order they were placed.
    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the order was last updated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Status transitions
impl Order {
    /// Records that every line has been reserved.
    pub fn mark_inventory_reserved(&mut self) -> Result<(), OrderError> {
        self.transition(
            OrderStatus::InventoryReserved,
            self.status.can_mark_inventory_reserved(),
            "mark inventory reserved",
        )
    }

    /// Records that the payment was charged.
    pub fn mark_payment_processing(&mut self) -> Result<(), OrderError> {
        self.transition(
            OrderStatus::PaymentProcessing,
            self.status.can_start_payment(),
            "start payment processing",
        )
    }

    /// Marks the order completed.
    pub fn complete(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Completed, self.status.can_complete(), "complete")
    }

    /// Marks the order failed.
    pub fn fail(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Failed, self.status.can_fail(), "fail")
    }

    fn transition(
        &mut self,
        next: OrderStatus,
        allowed: bool,
        action: &'static str,
    ) -> Result<(), OrderError> {
        if !allowed {
            return Err(OrderError::InvalidStatusTransition {
                current_status: self.status,
                action,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
