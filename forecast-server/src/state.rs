//! Shared application state.

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::device::ResolvedDevice;
use crate::engine::ResourceSet;
use crate::error::Result;
use crate::gateway::PoolRouter;
use crate::metrics::Metrics;
use crate::service::PredictionService;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub service: Arc<PredictionService>,
    pub admission: Arc<AdmissionController>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire pools, router and admission from configuration and the
    /// resources constructed by the caller.
    pub fn build(config: Config, device: ResolvedDevice, resources: ResourceSet) -> Result<Self> {
        let classification = config.routing.classification()?;
        let router = Arc::new(PoolRouter::from_resources(
            &resources,
            &config.pools,
            classification,
        )?);
        let service = Arc::new(PredictionService::new(
            router,
            device,
            config.prediction.clone(),
            config.execution.timeout(),
        ));
        let admission = Arc::new(AdmissionController::new(
            &config.security,
            &config.rate_limit,
        ));

        Ok(Self {
            config,
            service,
            admission,
            metrics: Arc::new(Metrics::new()),
        })
    }
}
