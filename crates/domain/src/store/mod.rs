//! Order persistence.

mod memory;
mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

use async_trait::async_trait;
use common::{OrderId, UserId};

use crate::error::Result;
use crate::order::Order;

/// Persistence contract for orders.
///
/// The saga inserts an order once in `Pending` and afterwards only persists
/// status transitions; lines are immutable after insertion.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order with its lines.
    ///
    /// Fails with `DomainError::DuplicateOrder` if the ID already exists.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Persists the current status and update timestamp of an order.
    ///
    /// Fails with `DomainError::OrderNotFound` if the order was never inserted.
    async fn update_status(&self, order: &Order) -> Result<()>;

    /// Loads an order by ID.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, oldest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>>;
}
