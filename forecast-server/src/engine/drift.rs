//! Built-in drift forecaster.
//!
//! Extrapolates the clipped mean close-to-close return of the trailing
//! context window. It stands in for a real model so the server runs with no
//! external weights; it makes no accuracy claims.

use forecast_common::{Candle, PredictionPoint};

use super::{
    InferenceResource, PredictionInput, PredictionOutput, ResourceError, SeriesForecast,
    SeriesInput,
};
use crate::config::PredictionConfig;
use crate::device::Device;

const MODEL_VERSION: &str = "drift-forecaster-v1";

pub struct DriftForecaster {
    device: Device,
    max_context: usize,
    clip: f64,
}

impl DriftForecaster {
    pub fn new(device: Device, config: &PredictionConfig) -> Self {
        Self {
            device,
            max_context: config.max_context.max(1),
            clip: config.clip,
        }
    }

    fn forecast(
        &self,
        series: &SeriesInput,
        horizon: usize,
    ) -> Result<SeriesForecast, ResourceError> {
        let label = series.series_id.as_deref().unwrap_or("<unnamed>");
        let start = series.candles.len().saturating_sub(self.max_context);
        let context = &series.candles[start..];

        let Some(last) = context.last() else {
            return Err(ResourceError::InvalidInput(format!("series {} is empty", label)));
        };
        if context.iter().any(|c| !is_finite(c)) {
            return Err(ResourceError::InvalidInput(format!(
                "series {} contains non-finite values",
                label
            )));
        }

        let drift = self.clipped_mean_return(context);
        let half_range = mean(
            context
                .iter()
                .filter(|c| c.close != 0.0)
                .map(|c| (c.high - c.low).abs() / c.close.abs()),
        ) / 2.0;
        let volume = mean(context.iter().map(|c| c.volume));
        let amount = mean(context.iter().map(|c| c.amount));

        let mut prev_close = last.close;
        let points = series
            .prediction_timestamps
            .iter()
            .take(horizon)
            .map(|&timestamp| {
                let open = prev_close;
                let close = open * (1.0 + drift);
                prev_close = close;
                PredictionPoint {
                    timestamp,
                    open,
                    high: open.max(close) * (1.0 + half_range),
                    low: open.min(close) * (1.0 - half_range),
                    close,
                    volume,
                    amount,
                }
            })
            .collect();

        Ok(SeriesForecast {
            series_id: series.series_id.clone(),
            points,
        })
    }

    /// Mean return after clipping outliers to `clip` standard deviations.
    fn clipped_mean_return(&self, context: &[Candle]) -> f64 {
        let returns: Vec<f64> = context
            .windows(2)
            .filter(|w| w[0].close != 0.0)
            .map(|w| w[1].close / w[0].close - 1.0)
            .collect();
        if returns.is_empty() {
            return 0.0;
        }

        let mu = mean(returns.iter().copied());
        let sigma = (mean(returns.iter().map(|r| (r - mu).powi(2)))).sqrt();
        if sigma == 0.0 {
            return mu;
        }

        mean(
            returns
                .iter()
                .map(|r| mu + sigma * ((r - mu) / sigma).clamp(-self.clip, self.clip)),
        )
    }
}

impl InferenceResource for DriftForecaster {
    fn name(&self) -> &str {
        "drift"
    }

    fn model_version(&self) -> Option<&str> {
        Some(MODEL_VERSION)
    }

    fn device(&self) -> Device {
        self.device
    }

    fn infer(&self, input: &PredictionInput) -> Result<PredictionOutput, ResourceError> {
        let forecasts = input
            .series
            .iter()
            .map(|series| self.forecast(series, input.params.pred_len))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PredictionOutput { forecasts })
    }
}

fn is_finite(c: &Candle) -> bool {
    [c.open, c.high, c.low, c.close, c.volume, c.amount]
        .iter()
        .all(|v| v.is_finite())
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
