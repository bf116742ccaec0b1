//! Saga steps and step names.

use common::{OrderId, ProductCode};
use serde::{Deserialize, Serialize};

/// Saga type recorded on spans and logs.
pub const SAGA_TYPE: &str = "OrderCreation";

pub const STEP_INVENTORY_RESERVE: &str = "INVENTORY_RESERVE";
pub const STEP_PAYMENT: &str = "PAYMENT";
pub const STEP_INVENTORY_CONFIRM: &str = "INVENTORY_CONFIRM";
pub const STEP_PERSIST_ORDER: &str = "PERSIST_ORDER";

/// A completed, compensable step of one saga execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    /// Stock reserved for one order line; compensated by a cancel.
    InventoryReserve {
        product_code: ProductCode,
        quantity: u32,
    },

    /// Payment charged; compensated by a refund.
    Payment { order_id: OrderId },
}

impl SagaStep {
    pub fn name(&self) -> &'static str {
        match self {
            SagaStep::InventoryReserve { .. } => STEP_INVENTORY_RESERVE,
            SagaStep::Payment { .. } => STEP_PAYMENT,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SagaStep::InventoryReserve {
                product_code,
                quantity,
            } => write!(f, "{}({product_code} x{quantity})", self.name()),
            SagaStep::Payment { order_id } => write!(f, "{}({order_id})", self.name()),
        }
    }
}
