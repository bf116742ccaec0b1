use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};
use tokio::sync::RwLock;

use super::OrderStore;
use crate::error::{DomainError, Result};
use crate::order::Order;

/// In-memory order store.
///
/// Provides the same contract as the PostgreSQL implementation; clones share
/// the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(DomainError::DuplicateOrder(order.id()));
        }
        orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn update_status(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id())
            .ok_or(DomainError::OrderNotFound(order.id()))?;
        *stored = order.clone();
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        matching.sort_by_key(|o| o.created_at());
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Money, OrderLine, OrderStatus};

    fn make_order(user_id: UserId) -> Order {
        Order::new(
            user_id,
            vec![OrderLine::new("SKU-001", "Widget", 2, Money::from_cents(1000))],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryOrderStore::new();
        let order = make_order(UserId::new());

        store.insert(&order).await.unwrap();

        let loaded = store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded, order);
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryOrderStore::new();
        let order = make_order(UserId::new());

        store.insert(&order).await.unwrap();
        let result = store.insert(&order).await;
        assert!(matches!(result, Err(DomainError::DuplicateOrder(id)) if id == order.id()));
    }

    #[tokio::test]
    async fn test_update_status_persists_transition() {
        let store = InMemoryOrderStore::new();
        let mut order = make_order(UserId::new());
        store.insert(&order).await.unwrap();

        order.mark_inventory_reserved().unwrap();
        store.update_status(&order).await.unwrap();

        let loaded = store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::InventoryReserved);
    }

    #[tokio::test]
    async fn test_update_unknown_order_fails() {
        let store = InMemoryOrderStore::new();
        let order = make_order(UserId::new());
        let result = store.update_status(&order).await;
        assert!(matches!(result, Err(DomainError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_user_filters_other_users() {
        let store = InMemoryOrderStore::new();
        let user = UserId::new();
        store.insert(&make_order(user)).await.unwrap();
        store.insert(&make_order(user)).await.unwrap();
        store.insert(&make_order(UserId::new())).await.unwrap();

        let orders = store.list_by_user(user).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.user_id() == user));
    }
}
