//! Domain layer for the order saga.
//!
//! This crate provides:
//! - The `Order` aggregate with its status state machine
//! - Value objects (`Money`, `OrderLine`)
//! - The `OrderStore` persistence contract with in-memory and PostgreSQL backends

pub mod error;
pub mod order;
pub mod store;

pub use error::DomainError;
pub use order::{Money, Order, OrderError, OrderLine, OrderStatus};
pub use store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
