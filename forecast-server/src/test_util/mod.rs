//! Fixtures shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use forecast_common::{Candle, PoolName, PredictionPoint};

use crate::config::Config;
use crate::device::{Device, DeviceInventory, DeviceResolver};
use crate::engine::{
    InferenceResource, PredictionInput, PredictionOutput, ResourceError, ResourceSet,
    SeriesForecast, SeriesInput,
};
use crate::state::AppState;

/// Resource whose latency, failures and liveness are scripted by the test.
///
/// It repeats the last close for every requested timestamp and counts
/// calls, completions and peak concurrency.
pub struct ScriptedResource {
    device: Device,
    delay: Option<Duration>,
    failure: Option<String>,
    panics: bool,
    alive: AtomicBool,
    calls: AtomicUsize,
    completed: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedResource {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            delay: None,
            failure: None,
            panics: false,
            alive: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Block every call for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Calls that entered `infer`.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that returned from `infer`, successfully or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `infer` calls seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedResource {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceResource for ScriptedResource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_version(&self) -> Option<&str> {
        Some("scripted-v1")
    }

    fn device(&self) -> Device {
        self.device
    }

    fn infer(&self, input: &PredictionInput) -> Result<PredictionOutput, ResourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.panics {
            panic!("scripted resource panic");
        }
        if let Some(message) = &self.failure {
            return Err(ResourceError::Runtime(message.clone()));
        }

        let forecasts = input
            .series
            .iter()
            .map(|series| {
                let close = series.candles.last().map(|c| c.close).unwrap_or_default();
                SeriesForecast {
                    series_id: series.series_id.clone(),
                    points: series
                        .prediction_timestamps
                        .iter()
                        .take(input.params.pred_len)
                        .map(|&timestamp| PredictionPoint {
                            timestamp,
                            open: close,
                            high: close,
                            low: close,
                            close,
                            volume: 0.0,
                            amount: 0.0,
                        })
                        .collect(),
                }
            })
            .collect();
        Ok(PredictionOutput { forecasts })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// A one-minute series of `candles` bars followed by `horizon` future timestamps.
pub fn single_series(candles: usize, horizon: usize) -> SeriesInput {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let minute = chrono::Duration::minutes(1);
    SeriesInput {
        series_id: Some("test".to_string()),
        candles: (0..candles)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle {
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1.0,
                    amount: close,
                }
            })
            .collect(),
        timestamps: (0..candles).map(|i| base + minute * i as i32).collect(),
        prediction_timestamps: (0..horizon)
            .map(|i| base + minute * (candles + i) as i32)
            .collect(),
    }
}

/// Default configuration with a short deadline, suited to tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.api.host = "127.0.0.1".to_string();
    config.execution.timeout_secs = 5;
    config.logging.level = "debug".to_string();
    config
}

/// Application state over one scripted resource per pool, on a CPU-only host.
pub fn create_test_state(
    config: Config,
    fast: Arc<ScriptedResource>,
    slow: Arc<ScriptedResource>,
) -> AppState {
    let resolved = DeviceResolver::new(DeviceInventory::cpu_only())
        .resolve(&config.device.selection)
        .unwrap();
    let resources = ResourceSet::new()
        .with(PoolName::Fast, fast)
        .with(PoolName::Slow, slow);
    AppState::build(config, resolved, resources).unwrap()
}
