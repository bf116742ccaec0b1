//! Integration tests for the Order aggregate and the in-memory store.

use common::UserId;
use domain::{
    DomainError, InMemoryOrderStore, Money, Order, OrderError, OrderLine, OrderStatus, OrderStore,
};

fn widget_and_gadget(user_id: UserId) -> Order {
    Order::new(
        user_id,
        vec![
            OrderLine::new("SKU-001", "Widget A", 2, Money::from_cents(1000)),
            OrderLine::new("SKU-002", "Widget B", 3, Money::from_cents(1500)),
        ],
    )
    .unwrap()
}

mod order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn completed_lifecycle_is_persisted_step_by_step() {
        let store = InMemoryOrderStore::new();
        let mut order = widget_and_gadget(UserId::new());
        store.insert(&order).await.unwrap();

        let steps: [fn(&mut Order) -> Result<(), OrderError>; 3] = [
            Order::mark_inventory_reserved,
            Order::mark_payment_processing,
            Order::complete,
        ];
        let expected = [
            OrderStatus::InventoryReserved,
            OrderStatus::PaymentProcessing,
            OrderStatus::Completed,
        ];

        for (step, status) in steps.into_iter().zip(expected) {
            step(&mut order).unwrap();
            store.update_status(&order).await.unwrap();
            let loaded = store.get(order.id()).await.unwrap().unwrap();
            assert_eq!(loaded.status(), status);
        }

        let loaded = store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.total_amount(), Money::from_cents(6500));
        assert!(loaded.is_terminal());
    }

    #[tokio::test]
    async fn failed_order_keeps_its_total() {
        let store = InMemoryOrderStore::new();
        let mut order = widget_and_gadget(UserId::new());
        store.insert(&order).await.unwrap();

        order.mark_inventory_reserved().unwrap();
        order.fail().unwrap();
        store.update_status(&order).await.unwrap();

        let loaded = store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::Failed);
        let sum: i64 = loaded
            .lines()
            .iter()
            .map(|l| l.unit_price.cents() * i64::from(l.quantity))
            .sum();
        assert_eq!(loaded.total_amount().cents(), sum);
    }

    #[tokio::test]
    async fn line_snapshots_are_kept_in_order() {
        let store = InMemoryOrderStore::new();
        let order = widget_and_gadget(UserId::new());
        store.insert(&order).await.unwrap();

        let loaded = store.get(order.id()).await.unwrap().unwrap();
        let codes: Vec<&str> = loaded
            .lines()
            .iter()
            .map(|l| l.product_code.as_str())
            .collect();
        assert_eq!(codes, vec!["SKU-001", "SKU-002"]);
        assert_eq!(loaded.lines()[1].product_name, "Widget B");
    }
}

mod store_contract {
    use super::*;

    #[tokio::test]
    async fn missing_order_is_none() {
        let store = InMemoryOrderStore::new();
        let order = widget_and_gadget(UserId::new());
        assert!(store.get(order.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_update_before_insert_is_rejected() {
        let store = InMemoryOrderStore::new();
        let order = widget_and_gadget(UserId::new());
        let err = store.update_status(&order).await.unwrap_err();
        assert!(matches!(err, DomainError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn list_by_user_is_oldest_first() {
        let store = InMemoryOrderStore::new();
        let user = UserId::new();
        let first = widget_and_gadget(user);
        let second = widget_and_gadget(user);
        store.insert(&second).await.unwrap();
        store.insert(&first).await.unwrap();

        let orders = store.list_by_user(user).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].created_at() <= orders[1].created_at());
    }
}
