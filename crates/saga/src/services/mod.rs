//! Collaborator contracts called by the saga, with in-memory and PostgreSQL
//! implementations.

pub mod catalog;
pub mod inventory;
pub mod payment;
pub mod postgres;

pub use catalog::{ProductCatalog, ProductSnapshot};
pub use inventory::{
    InMemoryInventoryLedger, InventoryError, InventoryLedger, InventoryRecord, ReserveReply,
};
pub use payment::{
    AmountLimit, ApprovalRate, ApproveAll, DeclineAll, InMemoryPaymentProcessor, PaymentError,
    PaymentMethod, PaymentOutcome, PaymentProcessor, PaymentRecord, PaymentStatus, Settlement,
    SettlementPolicy,
};
pub use postgres::{PostgresInventoryLedger, PostgresPaymentProcessor};
