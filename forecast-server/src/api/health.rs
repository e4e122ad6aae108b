//! Liveness and readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use forecast_common::{HealthResponse, ReadyResponse};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// GET /v1/healthz - always 200, with per-pool detail.
async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.service.health())
}

/// GET /v1/readyz
async fn readyz(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    let ready = state.service.is_ready();
    Json(ReadyResponse {
        status: if ready { "ok" } else { "loading" }.to_string(),
        model_loaded: ready,
    })
}
