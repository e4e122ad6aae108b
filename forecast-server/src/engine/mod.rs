//! Inference resource abstraction.
//!
//! This module defines the `InferenceResource` trait that hides the model
//! behind a blocking, opaque `infer` call. One resource instance is bound to
//! one device and serves one pool; callers never reach it except through the
//! execution gate.

mod drift;
mod registry;

pub use drift::DriftForecaster;
pub use registry::ResourceSet;

use chrono::{DateTime, Utc};
use forecast_common::{Candle, PredictionPoint};

use crate::device::Device;

/// Sampling parameters after merging request overrides onto server defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionParams {
    pub pred_len: usize,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub sample_count: u32,
}

/// One series handed to the model.
#[derive(Debug, Clone)]
pub struct SeriesInput {
    pub series_id: Option<String>,
    pub candles: Vec<Candle>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub prediction_timestamps: Vec<DateTime<Utc>>,
}

/// Payload of one inference job. All series share the same parameters.
#[derive(Debug, Clone)]
pub struct PredictionInput {
    pub series: Vec<SeriesInput>,
    pub params: PredictionParams,
}

impl PredictionInput {
    /// Total number of input candles, used for log sizing.
    pub fn rows(&self) -> usize {
        self.series.iter().map(|s| s.candles.len()).sum()
    }
}

/// Forecast for one input series, in input order.
#[derive(Debug, Clone)]
pub struct SeriesForecast {
    pub series_id: Option<String>,
    pub points: Vec<PredictionPoint>,
}

#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub forecasts: Vec<SeriesForecast>,
}

/// Errors raised by a resource while running inference.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Runtime(String),
}

/// A loaded model bound to one device.
///
/// `infer` blocks for an input-dependent, unbounded time and must only be
/// called from a blocking worker. Implementations need not tolerate more
/// concurrent callers than the capacity of the pool that owns them.
pub trait InferenceResource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Version string reported to callers, if the model has one.
    fn model_version(&self) -> Option<&str> {
        None
    }

    /// Device this instance is bound to.
    fn device(&self) -> Device;

    /// Run one prediction.
    fn infer(&self, input: &PredictionInput) -> Result<PredictionOutput, ResourceError>;

    /// Cheap liveness signal, sampled periodically by the health monitor.
    fn is_alive(&self) -> bool {
        true
    }
}
