//! Order placement and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use domain::Order;
use saga::{OrderItem, PaymentMethod, SagaFailure, SagaOutcome, SagaStep};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{AppState, Backend};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub payment_method: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub items: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_code: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct PlaceOrderResponse {
    pub order_id: String,
    pub status: String,
    pub total_cents: i64,
    pub items: Vec<OrderLineResponse>,
    pub message: String,
    pub failure: Option<SagaFailure>,
    pub compensated: Vec<SagaStep>,
    pub compensation_failures: usize,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status().to_string(),
            items: line_responses(order),
            total_cents: order.total_amount().cents(),
            created_at: order.created_at().to_rfc3339(),
            updated_at: order.updated_at().to_rfc3339(),
        }
    }
}

impl From<SagaOutcome> for PlaceOrderResponse {
    fn from(outcome: SagaOutcome) -> Self {
        Self {
            order_id: outcome.order.id().to_string(),
            status: outcome.order.status().to_string(),
            total_cents: outcome.order.total_amount().cents(),
            items: line_responses(&outcome.order),
            message: outcome.message,
            failure: outcome.failure,
            compensated: outcome.compensated,
            compensation_failures: outcome.compensation_failures.len(),
        }
    }
}

fn line_responses(order: &Order) -> Vec<OrderLineResponse> {
    order
        .lines()
        .iter()
        .map(|line| OrderLineResponse {
            product_code: line.product_code.to_string(),
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
        })
        .collect()
}

// -- Handlers --

/// POST /orders — place an order and run the saga for it.
///
/// Returns 201 with the final status whether the saga completed or failed.
#[tracing::instrument(skip(state, req))]
pub async fn create<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), ApiError> {
    let user_id: UserId = req
        .user_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {e}")))?;
    let payment_method: PaymentMethod = req
        .payment_method
        .parse()
        .map_err(ApiError::BadRequest)?;

    let outcome = state
        .coordinator
        .place_order(user_id, req.items, payment_method)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// GET /orders/{id} — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;

    let order = state
        .coordinator
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /users/{id}/orders — list a user's orders, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let user_id: UserId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;

    let orders = state.coordinator.list_orders(user_id).await?;

    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}
