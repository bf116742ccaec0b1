//! PostgreSQL integration tests for the ledger, the processor, and the saga.
//!
//! These tests use a shared PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{OrderId, ProductCode, UserId};
use domain::{Money, OrderStatus, OrderStore, PostgresOrderStore};
use resilience::EnvelopeConfig;
use saga::services::DeclineAll;
use saga::{
    InventoryError, InventoryLedger, OrderItem, PaymentMethod, PaymentProcessor, PaymentStatus,
    PostgresInventoryLedger, PostgresPaymentProcessor, ProductCatalog, SagaConfig,
    SagaCoordinator,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_saga_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payments, inventory, order_lines, orders")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

async fn seeded_ledger(pool: &PgPool) -> PostgresInventoryLedger {
    let ledger = PostgresInventoryLedger::new(pool.clone());
    ledger
        .restock(
            &ProductCode::new("SKU-001"),
            "Widget",
            Money::from_cents(1000),
            10,
        )
        .await
        .unwrap();
    ledger
        .restock(
            &ProductCode::new("SKU-002"),
            "Gadget",
            Money::from_cents(2500),
            5,
        )
        .await
        .unwrap();
    ledger
}

fn fast_config() -> SagaConfig {
    SagaConfig {
        reserve: EnvelopeConfig::timeout_only(Duration::from_secs(5)),
        payment: EnvelopeConfig::timeout_only(Duration::from_secs(5)),
        ..SagaConfig::default()
    }
}

async fn availability(ledger: &PostgresInventoryLedger, code: &str) -> (u32, u32) {
    let record = ledger
        .record(&ProductCode::new(code))
        .await
        .unwrap()
        .unwrap();
    (record.stock, record.reserved_stock)
}

#[tokio::test]
#[serial]
async fn test_reserve_beyond_available_is_rejected() {
    let pool = get_test_pool().await;
    let ledger = seeded_ledger(&pool).await;
    let code = ProductCode::new("SKU-001");

    ledger.reserve(OrderId::new(), &code, 5).await.unwrap();
    let err = ledger.reserve(OrderId::new(), &code, 6).await.unwrap_err();

    assert!(matches!(
        err,
        InventoryError::InsufficientStock {
            requested: 6,
            available: 5,
            ..
        }
    ));
    assert_eq!(availability(&ledger, "SKU-001").await, (10, 5));
}

#[tokio::test]
#[serial]
async fn test_confirm_and_cancel_contracts() {
    let pool = get_test_pool().await;
    let ledger = seeded_ledger(&pool).await;
    let code = ProductCode::new("SKU-002");
    let order_id = OrderId::new();

    ledger.reserve(order_id, &code, 3).await.unwrap();
    ledger.confirm(order_id, &code, 2).await.unwrap();
    assert_eq!(availability(&ledger, "SKU-002").await, (3, 1));

    let err = ledger.confirm(order_id, &code, 2).await.unwrap_err();
    assert!(err.is_contract_violation());
    let err = ledger.cancel(order_id, &code, 2).await.unwrap_err();
    assert!(err.is_contract_violation());

    ledger.cancel(order_id, &code, 1).await.unwrap();
    assert_eq!(availability(&ledger, "SKU-002").await, (3, 0));

    let err = ledger
        .reserve(order_id, &ProductCode::new("SKU-404"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::UnknownProduct(_)));
}

#[tokio::test]
#[serial]
async fn test_restock_updates_name_price_and_stock() {
    let pool = get_test_pool().await;
    let ledger = seeded_ledger(&pool).await;
    let code = ProductCode::new("SKU-001");

    let record = ledger
        .restock(&code, "Widget v2", Money::from_cents(1100), 5)
        .await
        .unwrap();
    assert_eq!(record.stock, 15);
    assert_eq!(record.product_name, "Widget v2");

    let snapshot = ledger.product(&code).await.unwrap().unwrap();
    assert_eq!(snapshot.unit_price, Money::from_cents(1100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_reservations_never_oversell() {
    let pool = get_test_pool().await;
    let ledger = seeded_ledger(&pool).await;

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .reserve(OrderId::new(), &ProductCode::new("SKU-001"), 1)
                    .await
                    .is_ok()
            })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if task.await.unwrap() {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(availability(&ledger, "SKU-001").await, (10, 10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_payments_complete_once() {
    let pool = get_test_pool().await;
    let processor = PostgresPaymentProcessor::new(pool.clone());
    let order_id = OrderId::new();
    let user_id = UserId::new();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let processor = processor.clone();
            tokio::spawn(async move {
                processor
                    .process_payment(
                        order_id,
                        user_id,
                        Money::from_cents(4500),
                        PaymentMethod::CreditCard,
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().success() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let record = processor.payment(order_id).await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Completed);

    processor.refund_payment(order_id).await.unwrap();
    let record = processor.payment(order_id).await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Refunded);
    assert!(processor.refund_payment(order_id).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_saga_completes_against_postgres() {
    let pool = get_test_pool().await;
    let ledger = seeded_ledger(&pool).await;
    let coordinator = SagaCoordinator::with_config(
        PostgresOrderStore::new(pool.clone()),
        ledger.clone(),
        PostgresPaymentProcessor::new(pool.clone()),
        fast_config(),
    );
    let user_id = UserId::new();

    let outcome = coordinator
        .place_order(
            user_id,
            vec![OrderItem::new("SKU-001", 2), OrderItem::new("SKU-002", 1)],
            PaymentMethod::Wallet,
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.order.total_amount(), Money::from_cents(4500));
    assert_eq!(availability(&ledger, "SKU-001").await, (8, 0));
    assert_eq!(availability(&ledger, "SKU-002").await, (4, 0));

    let stored = coordinator
        .orders()
        .get(outcome.order.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), OrderStatus::Completed);
    assert_eq!(stored.lines().len(), 2);
    assert_eq!(coordinator.list_orders(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_declined_saga_releases_reservations() {
    let pool = get_test_pool().await;
    let ledger = seeded_ledger(&pool).await;
    let processor =
        PostgresPaymentProcessor::with_policy(pool.clone(), DeclineAll::new("Card declined"));
    let coordinator = SagaCoordinator::with_config(
        PostgresOrderStore::new(pool.clone()),
        ledger.clone(),
        processor.clone(),
        fast_config(),
    );

    let outcome = coordinator
        .place_order(
            UserId::new(),
            vec![OrderItem::new("SKU-001", 2), OrderItem::new("SKU-002", 1)],
            PaymentMethod::CreditCard,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status(), OrderStatus::Failed);
    assert_eq!(outcome.compensated.len(), 2);
    assert_eq!(availability(&ledger, "SKU-001").await, (10, 0));
    assert_eq!(availability(&ledger, "SKU-002").await, (5, 0));

    let record = processor.payment(outcome.order.id()).await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Failed);
}
