//! Prediction endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use forecast_common::{PredictBatchRequest, PredictResponse, PredictSingleRequest};

use crate::error::{Error, Result};
use crate::metrics::Outcome;
use crate::service::Prediction;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predict/single", post(predict_single))
        .route("/predict/batch", post(predict_batch))
}

/// POST /v1/predict/single
async fn predict_single(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictSingleRequest>,
) -> Result<Json<PredictResponse>> {
    let start = Instant::now();
    let result = state.service.predict_single(request).await;
    record(&state, "single", &result, start);

    result?
        .into_responses()
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| Error::Internal("model returned no forecast".to_string()))
}

/// POST /v1/predict/batch - one response per item, in request order.
async fn predict_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictBatchRequest>,
) -> Result<Json<Vec<PredictResponse>>> {
    let start = Instant::now();
    let result = state.service.predict_batch(request).await;
    record(&state, "batch", &result, start);

    Ok(Json(result?.into_responses()))
}

fn record(state: &AppState, route: &'static str, result: &Result<Prediction>, start: Instant) {
    let outcome = match result {
        Ok(_) => Outcome::Success,
        Err(e) => Outcome::from_error(e),
    };
    state.metrics.record_request(route, outcome, start.elapsed());
}
