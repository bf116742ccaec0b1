//! Payment processor endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use domain::Money;
use saga::{PaymentMethod, PaymentProcessor, PaymentRecord};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{AppState, Backend};

#[derive(Deserialize)]
pub struct ProcessPaymentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub payment_method: String,
}

#[derive(Serialize)]
pub struct ProcessPaymentResponse {
    pub success: bool,
    pub transaction_ref: Option<String>,
    pub message: String,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub payment_method: String,
    pub status: String,
    pub transaction_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<PaymentRecord> for PaymentResponse {
    fn from(record: PaymentRecord) -> Self {
        Self {
            id: record.id.to_string(),
            order_id: record.order_id.to_string(),
            user_id: record.user_id.to_string(),
            amount_cents: record.amount.cents(),
            payment_method: record.method.to_string(),
            status: record.status.to_string(),
            transaction_ref: record.transaction_ref,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

/// POST /payments — charge an order once.
///
/// Declines and duplicates are reported in the body with `success: false`.
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn process<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<ProcessPaymentRequest>,
) -> Result<Json<ProcessPaymentResponse>, ApiError> {
    let method: PaymentMethod = req.payment_method.parse().map_err(ApiError::BadRequest)?;

    let outcome = state
        .payments()
        .process_payment(
            req.order_id,
            req.user_id,
            Money::from_cents(req.amount_cents),
            method,
        )
        .await?;

    Ok(Json(ProcessPaymentResponse {
        success: outcome.success(),
        transaction_ref: outcome.transaction_ref().map(String::from),
        message: outcome.message(),
    }))
}

/// POST /payments/{order_id}/refund — refund a completed payment.
#[tracing::instrument(skip(state))]
pub async fn refund<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(order_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    state.payments().refund_payment(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /payments/{order_id} — the payment recorded for an order.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let id = parse_order_id(&order_id)?;
    let record = state
        .payments()
        .payment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No payment for order {order_id}")))?;

    Ok(Json(record.into()))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
