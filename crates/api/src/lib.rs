//! HTTP API server for the order creation saga.
//!
//! Exposes order placement and lookup, plus the inventory ledger and payment
//! processor contracts the saga consumes, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::ApprovalRate;
use saga::{
    InMemoryInventoryLedger, InMemoryPaymentProcessor, InventoryLedger, PaymentProcessor,
    PostgresInventoryLedger, PostgresPaymentProcessor, ProductCatalog, SagaConfig,
    SagaCoordinator,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The collaborator implementations an application instance runs on.
pub trait Backend: Send + Sync + 'static {
    type Orders: OrderStore + 'static;
    type Inventory: InventoryLedger + ProductCatalog + 'static;
    type Payments: PaymentProcessor + 'static;
}

/// In-process collaborators; state is lost on restart.
pub struct InMemoryBackend;

impl Backend for InMemoryBackend {
    type Orders = InMemoryOrderStore;
    type Inventory = InMemoryInventoryLedger;
    type Payments = InMemoryPaymentProcessor;
}

/// PostgreSQL-backed collaborators sharing one pool.
pub struct PostgresBackend;

impl Backend for PostgresBackend {
    type Orders = PostgresOrderStore;
    type Inventory = PostgresInventoryLedger;
    type Payments = PostgresPaymentProcessor;
}

/// Shared application state accessible from all handlers.
pub struct AppState<B: Backend> {
    pub coordinator: SagaCoordinator<B::Orders, B::Inventory, B::Payments>,
}

impl<B: Backend> AppState<B> {
    pub fn inventory(&self) -> &B::Inventory {
        self.coordinator.inventory()
    }

    pub fn payments(&self) -> &B::Payments {
        self.coordinator.payment()
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: Backend>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<B>))
        .route("/orders", post(routes::orders::create::<B>))
        .route("/orders/{id}", get(routes::orders::get::<B>))
        .route("/users/{id}/orders", get(routes::orders::list_for_user::<B>))
        .route(
            "/inventory/{code}",
            get(routes::inventory::get::<B>).put(routes::inventory::restock::<B>),
        )
        .route("/inventory/reserve", post(routes::inventory::reserve::<B>))
        .route("/inventory/confirm", post(routes::inventory::confirm::<B>))
        .route("/inventory/cancel", post(routes::inventory::cancel::<B>))
        .route("/payments", post(routes::payments::process::<B>))
        .route("/payments/{order_id}", get(routes::payments::get::<B>))
        .route(
            "/payments/{order_id}/refund",
            post(routes::payments::refund::<B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates state backed by in-memory collaborators.
pub fn create_in_memory_state(
    saga_config: SagaConfig,
    payment_approval_rate: f64,
) -> Arc<AppState<InMemoryBackend>> {
    let coordinator = SagaCoordinator::with_config(
        InMemoryOrderStore::new(),
        InMemoryInventoryLedger::new(),
        InMemoryPaymentProcessor::with_policy(ApprovalRate {
            rate: payment_approval_rate,
        }),
        saga_config,
    );
    Arc::new(AppState { coordinator })
}

/// Creates state backed by PostgreSQL.
pub fn create_postgres_state(
    pool: PgPool,
    saga_config: SagaConfig,
    payment_approval_rate: f64,
) -> Arc<AppState<PostgresBackend>> {
    let coordinator = SagaCoordinator::with_config(
        PostgresOrderStore::new(pool.clone()),
        PostgresInventoryLedger::new(pool.clone()),
        PostgresPaymentProcessor::with_policy(
            pool,
            ApprovalRate {
                rate: payment_approval_rate,
            },
        ),
        saga_config,
    );
    Arc::new(AppState { coordinator })
}
