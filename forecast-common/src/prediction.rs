//! Prediction request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PoolName;

/// One OHLCV bar of the input series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub amount: f64,
}

/// Per-request sampling overrides. Unset fields fall back to server defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionOverrides {
    #[serde(default)]
    pub pred_len: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub sample_count: Option<u32>,
}

/// `POST /v1/predict/single` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictSingleRequest {
    #[serde(default)]
    pub series_id: Option<String>,
    pub candles: Vec<Candle>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub prediction_timestamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub overrides: Option<PredictionOverrides>,
    /// Explicit pool choice; wins over the routing rules when that pool is healthy.
    #[serde(default)]
    pub pool: Option<PoolName>,
    /// Shortens the server's execution timeout for this request.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PredictSingleRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_series(&self.candles, &self.timestamps, &self.prediction_timestamps)
    }
}

/// One series inside a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictBatchItem {
    pub series_id: String,
    pub candles: Vec<Candle>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub prediction_timestamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub overrides: Option<PredictionOverrides>,
}

/// `POST /v1/predict/batch` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictBatchRequest {
    pub items: Vec<PredictBatchItem>,
    #[serde(default)]
    pub pool: Option<PoolName>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PredictBatchRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("items cannot be empty".to_string());
        }
        for item in &self.items {
            validate_series(&item.candles, &item.timestamps, &item.prediction_timestamps)
                .map_err(|e| format!("series {}: {}", item.series_id, e))?;
        }
        Ok(())
    }
}

fn validate_series(
    candles: &[Candle],
    timestamps: &[DateTime<Utc>],
    prediction_timestamps: &[DateTime<Utc>],
) -> Result<(), String> {
    if candles.is_empty() {
        return Err("candles cannot be empty".to_string());
    }
    if candles.len() != timestamps.len() {
        return Err("candles and timestamps length mismatch".to_string());
    }
    if prediction_timestamps.is_empty() {
        return Err("prediction_timestamps cannot be empty".to_string());
    }
    Ok(())
}

/// One forecast bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
}

/// Forecast for one series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub series_id: Option<String>,
    pub prediction: Vec<PredictionPoint>,
    pub model_version: Option<String>,
    /// Pool that served the request.
    pub pool: PoolName,
    /// Device the serving pool is bound to.
    pub device: String,
}
