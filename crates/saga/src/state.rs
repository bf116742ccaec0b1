//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of one saga execution.
///
/// State transitions:
/// ```text
/// NotStarted ──► ReservingInventory ──► ProcessingPayment ──► ConfirmingInventory ──┬──► Completed
///                        │                     │                                    └──► Inconsistent
///                        └─────────────────────┴──► Compensating ──► Failed
/// ```
///
/// Confirmation is never compensated: once payment succeeded the saga either
/// completes or stops as `Inconsistent` for an operator to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Saga has not started yet.
    #[default]
    NotStarted,

    /// Order lines are being reserved.
    ReservingInventory,

    /// The order total is being charged.
    ProcessingPayment,

    /// Reservations are being confirmed after a successful payment.
    ConfirmingInventory,

    /// A step failed and completed steps are being undone.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// Compensation finished after a failure (terminal state).
    Failed,

    /// Confirmation failed after payment (terminal state).
    Inconsistent,
}

impl SagaState {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    /// Returns true if a step failure in this state is compensated.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaState::ReservingInventory | SagaState::ProcessingPayment
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Failed | SagaState::Inconsistent
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::ReservingInventory => "ReservingInventory",
            SagaState::ProcessingPayment => "ProcessingPayment",
            SagaState::ConfirmingInventory => "ConfirmingInventory",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
            SagaState::Inconsistent => "Inconsistent",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_not_started() {
        assert_eq!(SagaState::default(), SagaState::NotStarted);
        assert!(SagaState::NotStarted.can_run());
        assert!(!SagaState::ReservingInventory.can_run());
    }

    #[test]
    fn test_confirmation_is_not_compensable() {
        assert!(SagaState::ReservingInventory.can_compensate());
        assert!(SagaState::ProcessingPayment.can_compensate());
        assert!(!SagaState::ConfirmingInventory.can_compensate());
        assert!(!SagaState::Compensating.can_compensate());
        assert!(!SagaState::Completed.can_compensate());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaState::NotStarted.is_terminal());
        assert!(!SagaState::ProcessingPayment.is_terminal());
        assert!(!SagaState::Compensating.is_terminal());
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());
        assert!(SagaState::Inconsistent.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::ReservingInventory.to_string(), "ReservingInventory");
        assert_eq!(SagaState::Inconsistent.to_string(), "Inconsistent");
    }
}
