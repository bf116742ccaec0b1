//! Inventory ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductCode};
use domain::Money;
use saga::{InventoryLedger, InventoryRecord, ReserveReply};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{AppState, Backend};

// -- Request types --

#[derive(Deserialize)]
pub struct RestockRequest {
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct LedgerRequest {
    pub order_id: OrderId,
    pub product_code: ProductCode,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct InventoryResponse {
    pub product_code: String,
    pub product_name: String,
    pub stock: u32,
    pub reserved_stock: u32,
    pub available: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct ReserveResponse {
    pub success: bool,
    pub message: String,
    pub quantity_reserved: Option<u32>,
}

impl From<InventoryRecord> for InventoryResponse {
    fn from(record: InventoryRecord) -> Self {
        Self {
            available: record.available(),
            product_code: record.product_code.to_string(),
            product_name: record.product_name,
            stock: record.stock,
            reserved_stock: record.reserved_stock,
            unit_price_cents: record.unit_price.cents(),
        }
    }
}

// -- Handlers --

/// PUT /inventory/{code} — add stock, creating the product if needed.
#[tracing::instrument(skip(state, req))]
pub async fn restock<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(code): Path<String>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let price = Money::from_cents(req.unit_price_cents);
    if price.is_negative() {
        return Err(ApiError::BadRequest(format!(
            "Invalid price for {code}: {price}"
        )));
    }

    let record = state
        .inventory()
        .restock(&ProductCode::new(code), &req.product_name, price, req.quantity)
        .await?;

    Ok(Json(record.into()))
}

/// GET /inventory/{code} — stock levels for one product.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(code): Path<String>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let record = state
        .inventory()
        .record(&ProductCode::new(code.as_str()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {code} not found")))?;

    Ok(Json(record.into()))
}

/// POST /inventory/reserve — reserve stock for an order line.
///
/// Business rejections are reported in the body, not as an error status.
#[tracing::instrument(
    skip(state, req),
    fields(order_id = %req.order_id, product_code = %req.product_code)
)]
pub async fn reserve<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<LedgerRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let result = state
        .inventory()
        .reserve(req.order_id, &req.product_code, req.quantity)
        .await;
    let reply = ReserveReply::from_result(req.quantity, result)?;

    Ok(Json(ReserveResponse {
        success: reply.success(),
        message: reply.message(),
        quantity_reserved: reply.quantity_reserved(),
    }))
}

/// POST /inventory/confirm — consume previously reserved stock.
#[tracing::instrument(
    skip(state, req),
    fields(order_id = %req.order_id, product_code = %req.product_code)
)]
pub async fn confirm<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<LedgerRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .inventory()
        .confirm(req.order_id, &req.product_code, req.quantity)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /inventory/cancel — release previously reserved stock.
#[tracing::instrument(
    skip(state, req),
    fields(order_id = %req.order_id, product_code = %req.product_code)
)]
pub async fn cancel<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<LedgerRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .inventory()
        .cancel(req.order_id, &req.product_code, req.quantity)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
