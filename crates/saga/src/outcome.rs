//! Structured saga results.

use domain::{Order, OrderStatus};
use serde::Serialize;
use thiserror::Error;

use crate::step::SagaStep;

/// Message returned for orders rejected while the saga breaker is open.
pub const TEMPORARILY_UNAVAILABLE: &str =
    "Order service is temporarily unavailable, please try again later";

/// Why a saga ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaFailure {
    /// The ledger refused a reservation (insufficient stock, unknown product).
    #[error("Inventory reservation failed for {product_code}: {reason}")]
    ReservationRejected { product_code: String, reason: String },

    /// The processor declined the charge or reported a duplicate.
    #[error("Payment failed: {reason}")]
    PaymentRejected { reason: String },

    /// A collaborator could not be reached after retries, timed out, or was
    /// short-circuited by its breaker.
    #[error("{step} unavailable: {reason}")]
    Unavailable { step: &'static str, reason: String },

    /// The saga breaker was open; no step was attempted.
    #[error("Order service is temporarily unavailable, please try again later")]
    ShortCircuited,
}

impl SagaFailure {
    /// Returns true for failures that indicate systemic distress rather than
    /// a business decision.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            SagaFailure::Unavailable { .. } | SagaFailure::ShortCircuited
        )
    }
}

/// A compensating action that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompensationFailure {
    pub step: SagaStep,
    pub reason: String,
}

/// Final result of one saga execution.
#[derive(Debug, Clone, Serialize)]
pub struct SagaOutcome {
    /// The order as persisted at the end of the saga.
    pub order: Order,

    /// Human-readable result.
    pub message: String,

    /// Set when the order ended in `FAILED`.
    pub failure: Option<SagaFailure>,

    /// Steps undone during compensation, in the order they were undone.
    pub compensated: Vec<SagaStep>,

    /// Compensating actions that failed.
    pub compensation_failures: Vec<CompensationFailure>,
}

impl SagaOutcome {
    pub(crate) fn completed(order: Order) -> Self {
        Self {
            order,
            message: "Order placed successfully".to_string(),
            failure: None,
            compensated: Vec::new(),
            compensation_failures: Vec::new(),
        }
    }

    pub(crate) fn failed(
        order: Order,
        failure: SagaFailure,
        compensated: Vec<SagaStep>,
        compensation_failures: Vec<CompensationFailure>,
    ) -> Self {
        Self {
            order,
            message: failure.to_string(),
            failure: Some(failure),
            compensated,
            compensation_failures,
        }
    }

    /// Returns true if the order completed.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn status(&self) -> OrderStatus {
        self.order.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemic_classification() {
        assert!(SagaFailure::ShortCircuited.is_systemic());
        assert!(
            SagaFailure::Unavailable {
                step: "PAYMENT",
                reason: "timeout".into()
            }
            .is_systemic()
        );
        assert!(
            !SagaFailure::PaymentRejected {
                reason: "declined".into()
            }
            .is_systemic()
        );
    }

    #[test]
    fn test_short_circuit_message() {
        assert_eq!(
            SagaFailure::ShortCircuited.to_string(),
            TEMPORARILY_UNAVAILABLE
        );
    }
}
