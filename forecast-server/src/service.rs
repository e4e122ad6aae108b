//! Prediction service: request validation, parameter resolution and the
//! route-then-execute path shared by the HTTP handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use forecast_common::{
    HealthResponse, PoolName, PredictBatchRequest, PredictResponse, PredictSingleRequest,
    PredictionOverrides,
};
use uuid::Uuid;

use crate::config::PredictionConfig;
use crate::device::{Device, ResolvedDevice};
use crate::engine::{PredictionInput, PredictionOutput, PredictionParams, SeriesInput};
use crate::error::{Error, Result};
use crate::gateway::{ExecutionGate, InferenceJob, JobShape, PoolRouter};

/// A finished prediction and where it ran.
#[derive(Debug)]
pub struct Prediction {
    pub job_id: Uuid,
    pub pool: PoolName,
    pub device: Device,
    pub model_version: Option<String>,
    pub output: PredictionOutput,
}

impl Prediction {
    /// One response per input series, in input order.
    pub fn into_responses(self) -> Vec<PredictResponse> {
        let device = self.device.to_string();
        self.output
            .forecasts
            .into_iter()
            .map(|forecast| PredictResponse {
                series_id: forecast.series_id,
                prediction: forecast.points,
                model_version: self.model_version.clone(),
                pool: self.pool,
                device: device.clone(),
            })
            .collect()
    }
}

pub struct PredictionService {
    router: Arc<PoolRouter>,
    gate: ExecutionGate,
    device: ResolvedDevice,
    defaults: PredictionConfig,
    timeout: Duration,
}

impl PredictionService {
    pub fn new(
        router: Arc<PoolRouter>,
        device: ResolvedDevice,
        defaults: PredictionConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            router,
            gate: ExecutionGate::new(),
            device,
            defaults,
            timeout,
        }
    }

    pub fn router(&self) -> &Arc<PoolRouter> {
        &self.router
    }

    pub fn device(&self) -> &ResolvedDevice {
        &self.device
    }

    pub async fn predict_single(&self, request: PredictSingleRequest) -> Result<Prediction> {
        request.validate().map_err(Error::InvalidRequest)?;
        let params = self.resolve_params(
            request.overrides.as_ref(),
            request.prediction_timestamps.len(),
        )?;

        let input = PredictionInput {
            series: vec![SeriesInput {
                series_id: request.series_id,
                candles: request.candles,
                timestamps: request.timestamps,
                prediction_timestamps: request.prediction_timestamps,
            }],
            params,
        };

        self.route_and_execute(input, JobShape::Single, request.pool, request.timeout_secs)
            .await
    }

    /// Run every item of a batch as one job. Items must resolve to the same
    /// sampling parameters.
    pub async fn predict_batch(&self, request: PredictBatchRequest) -> Result<Prediction> {
        request.validate().map_err(Error::InvalidRequest)?;

        let mut params: Option<PredictionParams> = None;
        let mut series = Vec::with_capacity(request.items.len());
        for item in request.items {
            let item_params = self
                .resolve_params(item.overrides.as_ref(), item.prediction_timestamps.len())
                .map_err(|e| match e {
                    Error::InvalidRequest(msg) => {
                        Error::InvalidRequest(format!("series {}: {}", item.series_id, msg))
                    }
                    other => other,
                })?;

            match &params {
                None => params = Some(item_params),
                Some(first) => {
                    if let Some(field) = first_difference(first, &item_params) {
                        return Err(Error::InvalidRequest(format!(
                            "Batch items must share the same {}",
                            field
                        )));
                    }
                }
            }

            series.push(SeriesInput {
                series_id: Some(item.series_id),
                candles: item.candles,
                timestamps: item.timestamps,
                prediction_timestamps: item.prediction_timestamps,
            });
        }

        let params = params.ok_or_else(|| Error::InvalidRequest("items cannot be empty".into()))?;
        let input = PredictionInput { series, params };

        self.route_and_execute(input, JobShape::Batch, request.pool, request.timeout_secs)
            .await
    }

    /// Route a job to a pool and run it under the effective timeout.
    pub async fn route_and_execute(
        &self,
        input: PredictionInput,
        shape: JobShape,
        override_pool: Option<PoolName>,
        timeout_secs: Option<u64>,
    ) -> Result<Prediction> {
        let timeout = self.effective_timeout(timeout_secs)?;
        let rows = input.rows();
        let series_count = input.series.len();
        let pred_len = input.params.pred_len;

        let mut job = InferenceJob::new(shape, input);
        let pool = self.router.select_pool(shape, override_pool)?;

        let start = Instant::now();
        let output = self.gate.execute(&mut job, &pool, timeout).await?;
        let resource = pool.resource();

        tracing::info!(
            job_id = %job.id(),
            shape = shape.as_str(),
            pool = %pool.name(),
            latency_ms = start.elapsed().as_millis() as u64,
            rows,
            pred_len,
            series_count,
            "Prediction completed"
        );

        Ok(Prediction {
            job_id: job.id(),
            pool: pool.name(),
            device: resource.device(),
            model_version: resource.model_version().map(str::to_string),
            output,
        })
    }

    /// The configured timeout, shortened by the request when it asks for less.
    pub fn effective_timeout(&self, timeout_secs: Option<u64>) -> Result<Duration> {
        match timeout_secs {
            None => Ok(self.timeout),
            Some(0) => Err(Error::InvalidRequest(
                "timeout_secs must be positive".to_string(),
            )),
            Some(secs) => Ok(self.timeout.min(Duration::from_secs(secs))),
        }
    }

    /// Merge request overrides onto the configured defaults.
    pub fn resolve_params(
        &self,
        overrides: Option<&PredictionOverrides>,
        horizon: usize,
    ) -> Result<PredictionParams> {
        let empty = PredictionOverrides::default();
        let overrides = overrides.unwrap_or(&empty);

        let pred_len = overrides.pred_len.unwrap_or(horizon);
        if pred_len != horizon {
            return Err(Error::InvalidRequest(format!(
                "pred_len ({}) must match the number of prediction_timestamps ({})",
                pred_len, horizon
            )));
        }

        let params = PredictionParams {
            pred_len,
            temperature: overrides.temperature.unwrap_or(self.defaults.temperature),
            top_k: overrides.top_k.unwrap_or(self.defaults.top_k),
            top_p: overrides.top_p.unwrap_or(self.defaults.top_p),
            sample_count: overrides.sample_count.unwrap_or(self.defaults.sample_count),
        };

        if !(params.temperature.is_finite() && params.temperature > 0.0) {
            return Err(Error::InvalidRequest(
                "temperature must be positive".to_string(),
            ));
        }
        if !(params.top_p > 0.0 && params.top_p <= 1.0) {
            return Err(Error::InvalidRequest(
                "top_p must be in (0, 1]".to_string(),
            ));
        }
        if params.sample_count == 0 {
            return Err(Error::InvalidRequest(
                "sample_count must be at least 1".to_string(),
            ));
        }
        Ok(params)
    }

    /// Per-pool snapshot plus device resolution. Never fails.
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            device_requested: self.device.spec.raw.clone(),
            device_resolved: self.device.device.to_string(),
            device_warning: self.device.warning.clone(),
            pools: self.router.snapshot(),
        }
    }

    /// Whether at least one pool can take work.
    pub fn is_ready(&self) -> bool {
        self.router.pools().iter().any(|pool| pool.is_healthy())
    }
}

fn first_difference(a: &PredictionParams, b: &PredictionParams) -> Option<&'static str> {
    if a.pred_len != b.pred_len {
        Some("pred_len")
    } else if a.temperature != b.temperature {
        Some("temperature")
    } else if a.top_k != b.top_k {
        Some("top_k")
    } else if a.top_p != b.top_p {
        Some("top_p")
    } else if a.sample_count != b.sample_count {
        Some("sample_count")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Classification, PoolsConfig};
    use crate::device::{DeviceInventory, DeviceResolver};
    use crate::engine::ResourceSet;
    use crate::test_util::{single_series, ScriptedResource};
    use forecast_common::PredictBatchItem;

    struct Fixture {
        fast: Arc<ScriptedResource>,
        slow: Arc<ScriptedResource>,
        service: PredictionService,
    }

    fn fixture_with(fast: ScriptedResource, slow: ScriptedResource) -> Fixture {
        let fast = Arc::new(fast);
        let slow = Arc::new(slow);
        let resources = ResourceSet::new()
            .with(PoolName::Fast, fast.clone())
            .with(PoolName::Slow, slow.clone());
        let pools = PoolsConfig {
            fast_capacity: 2,
            slow_capacity: 1,
        };
        let router = PoolRouter::from_resources(&resources, &pools, Classification::default())
            .unwrap();
        let device = DeviceResolver::new(DeviceInventory::cpu_only())
            .resolve("cuda:0")
            .unwrap();
        let service = PredictionService::new(
            Arc::new(router),
            device,
            PredictionConfig::default(),
            Duration::from_secs(5),
        );
        Fixture {
            fast,
            slow,
            service,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedResource::new(), ScriptedResource::new())
    }

    fn single_request(horizon: usize) -> PredictSingleRequest {
        let series = single_series(5, horizon);
        PredictSingleRequest {
            series_id: series.series_id,
            candles: series.candles,
            timestamps: series.timestamps,
            prediction_timestamps: series.prediction_timestamps,
            overrides: None,
            pool: None,
            timeout_secs: None,
        }
    }

    fn batch_item(id: &str, horizon: usize) -> PredictBatchItem {
        let series = single_series(5, horizon);
        PredictBatchItem {
            series_id: id.to_string(),
            candles: series.candles,
            timestamps: series.timestamps,
            prediction_timestamps: series.prediction_timestamps,
            overrides: None,
        }
    }

    #[tokio::test]
    async fn test_batch_routes_to_slow_pool() {
        let f = fixture();
        let request = PredictBatchRequest {
            items: vec![batch_item("a", 3), batch_item("b", 3)],
            pool: None,
            timeout_secs: None,
        };

        let prediction = f.service.predict_batch(request).await.unwrap();

        assert_eq!(prediction.pool, PoolName::Slow);
        assert_eq!(f.slow.calls(), 1);
        assert_eq!(f.fast.calls(), 0);
        let responses = prediction.into_responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].series_id.as_deref(), Some("a"));
        assert_eq!(responses[1].prediction.len(), 3);
        assert_eq!(responses[0].model_version.as_deref(), Some("scripted-v1"));
    }

    #[tokio::test]
    async fn test_single_fails_over_when_fast_down() {
        let f = fixture();
        f.service.router().pool(PoolName::Fast).set_healthy(false);

        let prediction = f.service.predict_single(single_request(2)).await.unwrap();
        assert_eq!(prediction.pool, PoolName::Slow);

        f.service.router().pool(PoolName::Slow).set_healthy(false);
        let err = f.service.predict_single(single_request(2)).await.unwrap_err();
        assert!(matches!(err, Error::NoHealthyPool));
        assert!(!f.service.is_ready());
    }

    #[tokio::test]
    async fn test_override_pool() {
        let f = fixture();
        let mut request = single_request(1);
        request.pool = Some(PoolName::Slow);

        let prediction = f.service.predict_single(request).await.unwrap();
        assert_eq!(prediction.pool, PoolName::Slow);
    }

    #[tokio::test]
    async fn test_request_timeout_shortens_deadline() {
        let f = fixture_with(
            ScriptedResource::new().with_delay(Duration::from_millis(1500)),
            ScriptedResource::new(),
        );
        let mut request = single_request(1);
        request.timeout_secs = Some(1);

        let started = Instant::now();
        let err = f.service.predict_single(request).await.unwrap_err();
        assert!(matches!(err, Error::PredictionTimeout(d) if d == Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_millis(1400));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_effective_timeout() {
        let f = fixture();
        assert_eq!(f.service.effective_timeout(None).unwrap(), Duration::from_secs(5));
        assert_eq!(
            f.service.effective_timeout(Some(2)).unwrap(),
            Duration::from_secs(2)
        );
        assert_eq!(
            f.service.effective_timeout(Some(600)).unwrap(),
            Duration::from_secs(5)
        );
        assert!(f.service.effective_timeout(Some(0)).is_err());
    }

    #[test]
    fn test_resolve_params_defaults_and_overrides() {
        let f = fixture();
        let params = f.service.resolve_params(None, 4).unwrap();
        assert_eq!(params.pred_len, 4);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.top_p, 0.9);

        let overrides = PredictionOverrides {
            temperature: Some(0.3),
            top_k: Some(5),
            ..PredictionOverrides::default()
        };
        let params = f.service.resolve_params(Some(&overrides), 4).unwrap();
        assert_eq!(params.temperature, 0.3);
        assert_eq!(params.top_k, 5);
    }

    #[test]
    fn test_resolve_params_rejects_bad_values() {
        let f = fixture();
        let cases = [
            PredictionOverrides {
                pred_len: Some(3),
                ..Default::default()
            },
            PredictionOverrides {
                temperature: Some(0.0),
                ..Default::default()
            },
            PredictionOverrides {
                top_p: Some(1.5),
                ..Default::default()
            },
            PredictionOverrides {
                sample_count: Some(0),
                ..Default::default()
            },
        ];
        for overrides in cases {
            assert!(
                matches!(
                    f.service.resolve_params(Some(&overrides), 4),
                    Err(Error::InvalidRequest(_))
                ),
                "{:?}",
                overrides
            );
        }
    }

    #[tokio::test]
    async fn test_batch_with_mixed_params_is_rejected() {
        let f = fixture();
        let mut second = batch_item("b", 2);
        second.overrides = Some(PredictionOverrides {
            temperature: Some(0.5),
            ..Default::default()
        });
        let request = PredictBatchRequest {
            items: vec![batch_item("a", 2), second],
            pool: None,
            timeout_secs: None,
        };

        match f.service.predict_batch(request).await.unwrap_err() {
            Error::InvalidRequest(msg) => assert!(msg.contains("temperature")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(f.slow.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_single_request() {
        let f = fixture();
        let mut request = single_request(2);
        request.timestamps.pop();
        assert!(matches!(
            f.service.predict_single(request).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_health_reports_fallback_and_pools() {
        let f = fixture();
        let health = f.service.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.device_requested, "cuda:0");
        assert_eq!(health.device_resolved, "cpu");
        assert!(health.device_warning.is_some());
        assert_eq!(health.pools.len(), 2);
        assert!(f.service.is_ready());
    }
}
