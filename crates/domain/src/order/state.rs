//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► InventoryReserved ──► PaymentProcessing ──► Completed
///    │               │                     │
///    └───────────────┴─────────────────────┴──► Failed
/// ```
///
/// `Cancelled` is a recognized terminal status; no saga path produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order was accepted and the saga has not reserved anything yet.
    #[default]
    Pending,

    /// Every line has been reserved in the inventory ledger.
    InventoryReserved,

    /// Payment was charged, reservations are being confirmed.
    PaymentProcessing,

    /// Stock consumed and payment settled (terminal state).
    Completed,

    /// Saga failed and compensation ran (terminal state).
    Failed,

    /// Order was withdrawn (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if inventory can be marked reserved in this status.
    pub fn can_mark_inventory_reserved(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if payment processing can start in this status.
    pub fn can_start_payment(&self) -> bool {
        matches!(self, OrderStatus::InventoryReserved)
    }

    /// Returns true if the order can be completed in this status.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::PaymentProcessing)
    }

    /// Returns true if the saga can divert the order to `Failed`.
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::InventoryReserved | OrderStatus::PaymentProcessing
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::InventoryReserved => "INVENTORY_RESERVED",
            OrderStatus::PaymentProcessing => "PAYMENT_PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "INVENTORY_RESERVED" => Ok(OrderStatus::InventoryReserved),
            "PAYMENT_PROCESSING" => Ok(OrderStatus::PaymentProcessing),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
