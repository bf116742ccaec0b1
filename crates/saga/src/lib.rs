//! Order creation saga.
//!
//! This crate coordinates order placement across an inventory ledger and a
//! payment processor without a distributed transaction:
//!
//! 1. Reserve inventory for every order line
//! 2. Charge the order total
//! 3. Confirm the reservations
//!
//! If reservation or payment fails, the completed steps are compensated in
//! reverse order (refund, then cancel reservations) and the order ends in
//! `FAILED`. Confirmation is never compensated.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod execution;
pub mod outcome;
pub mod services;
pub mod state;
pub mod step;

pub use config::SagaConfig;
pub use coordinator::{OrderItem, SagaCoordinator};
pub use error::SagaError;
pub use execution::SagaExecution;
pub use outcome::{CompensationFailure, SagaFailure, SagaOutcome, TEMPORARILY_UNAVAILABLE};
pub use services::{
    InMemoryInventoryLedger, InMemoryPaymentProcessor, InventoryError, InventoryLedger,
    InventoryRecord, PaymentError, PaymentMethod, PaymentOutcome, PaymentProcessor,
    PaymentRecord, PaymentStatus, PostgresInventoryLedger, PostgresPaymentProcessor,
    ProductCatalog, ReserveReply,
};
pub use state::SagaState;
pub use step::SagaStep;
