//! HTTP API.

pub mod admit;
pub mod health;
pub mod metrics;
pub mod predict;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::logging;
use crate::state::AppState;

/// Routes mounted under `/v1`.
fn v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::router())
        .merge(predict::router())
        .route("/metrics", get(metrics::metrics))
}

/// Build the full application router.
///
/// Layers run outermost first: CORS, tracing, body limit, request context,
/// then admission. Admission is a route layer, so unmatched paths and
/// wrong methods are answered without touching a caller's quota.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.api.max_request_size_mb * 1024 * 1024;

    Router::new()
        .nest("/v1", v1_router())
        .route("/metrics", get(metrics::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), admit::admit))
        .layer(middleware::from_fn(logging::request_context))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
