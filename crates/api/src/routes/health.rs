//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::{AppState, Backend};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// State of the breaker guarding saga executions.
    pub saga_breaker: String,
}

/// GET /health — returns system health status.
///
/// Reports `degraded` while the saga breaker is short-circuiting orders.
pub async fn check<B: Backend>(State(state): State<Arc<AppState<B>>>) -> Json<HealthResponse> {
    let breaker = state.coordinator.saga_breaker().state();
    let status = match breaker {
        resilience::CircuitState::Closed => "ok",
        _ => "degraded",
    };
    Json(HealthResponse {
        status,
        saga_breaker: breaker.to_string(),
    })
}
