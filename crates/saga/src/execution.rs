//! Bookkeeping for one saga execution.

use common::{OrderId, ProductCode};

use crate::error::{Result, SagaError};
use crate::outcome::SagaFailure;
use crate::state::SagaState;
use crate::step::SagaStep;

/// Tracks the state and completed steps of one saga execution.
///
/// Lives only for the duration of the execution; completed steps are kept in
/// completion order so compensation can walk them in reverse.
#[derive(Debug, Clone)]
pub struct SagaExecution {
    order_id: OrderId,
    state: SagaState,
    completed_steps: Vec<SagaStep>,
    transaction_ref: Option<String>,
    failure: Option<SagaFailure>,
}

impl SagaExecution {
    /// Starts an execution in `ReservingInventory`.
    pub fn start(order_id: OrderId) -> Self {
        Self {
            order_id,
            state: SagaState::ReservingInventory,
            completed_steps: Vec::new(),
            transaction_ref: None,
            failure: None,
        }
    }

    /// Records a successful reservation of one line.
    pub fn record_reservation(&mut self, product_code: ProductCode, quantity: u32) -> Result<()> {
        self.expect(SagaState::ReservingInventory, "ReservingInventory")?;
        self.completed_steps.push(SagaStep::InventoryReserve {
            product_code,
            quantity,
        });
        Ok(())
    }

    /// Moves on to charging once every line is reserved.
    pub fn begin_payment(&mut self) -> Result<()> {
        self.expect(SagaState::ReservingInventory, "ReservingInventory")?;
        self.state = SagaState::ProcessingPayment;
        Ok(())
    }

    /// Records a successful charge.
    pub fn record_payment(&mut self, transaction_ref: String) -> Result<()> {
        self.expect(SagaState::ProcessingPayment, "ProcessingPayment")?;
        self.completed_steps.push(SagaStep::Payment {
            order_id: self.order_id,
        });
        self.transaction_ref = Some(transaction_ref);
        Ok(())
    }

    /// Moves on to confirming reservations once payment succeeded.
    pub fn begin_confirmation(&mut self) -> Result<()> {
        self.expect(SagaState::ProcessingPayment, "ProcessingPayment")?;
        self.state = SagaState::ConfirmingInventory;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.expect(SagaState::ConfirmingInventory, "ConfirmingInventory")?;
        self.state = SagaState::Completed;
        Ok(())
    }

    /// Records the failure that triggers compensation.
    pub fn begin_compensation(&mut self, failure: SagaFailure) -> Result<()> {
        if !self.state.can_compensate() {
            return Err(SagaError::InvalidState {
                expected: "ReservingInventory or ProcessingPayment",
                actual: self.state,
            });
        }
        self.state = SagaState::Compensating;
        self.failure = Some(failure);
        Ok(())
    }

    /// Steps to undo, most recent first.
    pub fn compensation_plan(&self) -> impl Iterator<Item = &SagaStep> {
        self.completed_steps.iter().rev()
    }

    pub fn finish_failed(&mut self) -> Result<()> {
        self.expect(SagaState::Compensating, "Compensating")?;
        self.state = SagaState::Failed;
        Ok(())
    }

    /// Stops the execution after a confirmation failure.
    pub fn mark_inconsistent(&mut self) -> Result<()> {
        self.expect(SagaState::ConfirmingInventory, "ConfirmingInventory")?;
        self.state = SagaState::Inconsistent;
        Ok(())
    }

    fn expect(&self, state: SagaState, expected: &'static str) -> Result<()> {
        if self.state != state {
            return Err(SagaError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}

// Query methods
impl SagaExecution {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns completed steps in completion order.
    pub fn completed_steps(&self) -> &[SagaStep] {
        &self.completed_steps
    }

    pub fn transaction_ref(&self) -> Option<&str> {
        self.transaction_ref.as_deref()
    }

    pub fn failure(&self) -> Option<&SagaFailure> {
        self.failure.as_ref()
    }
}
