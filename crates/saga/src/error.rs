//! Saga error types.

use common::{OrderId, ProductCode};
use domain::{DomainError, OrderError};
use thiserror::Error;

use crate::outcome::CompensationFailure;
use crate::services::InventoryError;
use crate::state::SagaState;
use crate::step::SagaStep;

/// Conditions that escape the saga instead of ending in a [`crate::SagaOutcome`].
///
/// Business rejections and transient failures never appear here; they are
/// reported as failed outcomes after compensation.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order request is invalid.
    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderError),

    /// The order references a product that is not sold.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductCode),

    /// Product details could not be looked up.
    #[error("Catalog lookup failed: {0}")]
    Catalog(InventoryError),

    /// The order refused a status transition.
    #[error("Order transition failed: {0}")]
    Transition(OrderError),

    /// The execution bookkeeping was driven out of order.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SagaState,
    },

    /// Payment succeeded but a reservation could not be confirmed. The order
    /// is left in `PAYMENT_PROCESSING`.
    #[error(
        "Inventory confirmation failed for order {order_id} ({product_code}) after payment: {reason}"
    )]
    ConfirmFailed {
        order_id: OrderId,
        product_code: ProductCode,
        reason: String,
    },

    /// The order store failed.
    #[error("Order store error: {0}")]
    Store(#[from] DomainError),

    /// A status change could not be persisted before confirmation. The
    /// completed steps were undone first.
    #[error("Order store error during saga for order {order_id}: {source}")]
    PersistFailed {
        order_id: OrderId,
        source: DomainError,
        compensated: Vec<SagaStep>,
        compensation_failures: Vec<CompensationFailure>,
    },

    /// The task running the saga panicked or was cancelled.
    #[error("Saga for order {order_id} did not finish: {reason}")]
    Interrupted { order_id: OrderId, reason: String },
}

impl SagaError {
    /// Returns true if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SagaError::InvalidOrder(_) | SagaError::UnknownProduct(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
