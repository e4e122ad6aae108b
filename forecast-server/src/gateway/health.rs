//! Periodic pool liveness sampling.
//!
//! The monitor is the only writer of each pool's `healthy` flag. The router
//! reads the flags and never probes a resource on the request path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::router::PoolRouter;
use crate::admission::AdmissionController;

pub struct HealthMonitor {
    router: Arc<PoolRouter>,
    interval: Duration,
    admission: Option<Arc<AdmissionController>>,
}

impl HealthMonitor {
    pub fn new(router: Arc<PoolRouter>, interval: Duration) -> Self {
        Self {
            router,
            interval,
            admission: None,
        }
    }

    /// Also sweep idle rate-limit buckets on every tick.
    pub fn with_admission(mut self, admission: Arc<AdmissionController>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Sample every pool once. Returns the number of healthy pools.
    pub fn check_once(&self) -> usize {
        let mut healthy = 0;
        for pool in self.router.pools() {
            let alive = pool.resource().is_alive();
            let was = pool.set_healthy(alive);
            if was != alive {
                if alive {
                    tracing::info!(pool = %pool.name(), "Pool recovered");
                } else {
                    tracing::error!(pool = %pool.name(), "Pool marked unhealthy");
                }
            }
            if alive {
                healthy += 1;
            }
        }

        if healthy == 0 {
            tracing::error!("All pools unhealthy, predictions will be rejected");
        }

        if let Some(admission) = &self.admission {
            let removed = admission.sweep(Instant::now());
            if removed > 0 {
                tracing::debug!(removed, "Swept idle rate-limit buckets");
            }
        }

        healthy
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Classification, PoolsConfig, RateLimitConfig, SecurityConfig};
    use crate::engine::ResourceSet;
    use crate::test_util::ScriptedResource;
    use forecast_common::PoolName;

    fn setup() -> (Arc<ScriptedResource>, Arc<ScriptedResource>, Arc<PoolRouter>) {
        let fast = Arc::new(ScriptedResource::new());
        let slow = Arc::new(ScriptedResource::new());
        let resources = ResourceSet::new()
            .with(PoolName::Fast, fast.clone())
            .with(PoolName::Slow, slow.clone());
        let router = PoolRouter::from_resources(
            &resources,
            &PoolsConfig::default(),
            Classification::default(),
        )
        .unwrap();
        (fast, slow, Arc::new(router))
    }

    #[test]
    fn test_check_once_tracks_liveness() {
        let (fast, _slow, router) = setup();
        let monitor = HealthMonitor::new(router.clone(), Duration::from_secs(10));

        assert_eq!(monitor.check_once(), 2);

        fast.set_alive(false);
        assert_eq!(monitor.check_once(), 1);
        assert!(!router.pool(PoolName::Fast).is_healthy());
        assert!(router.pool(PoolName::Slow).is_healthy());

        fast.set_alive(true);
        monitor.check_once();
        assert!(router.pool(PoolName::Fast).is_healthy());
    }

    #[test]
    fn test_all_down() {
        let (fast, slow, router) = setup();
        fast.set_alive(false);
        slow.set_alive(false);
        let monitor = HealthMonitor::new(router.clone(), Duration::from_secs(10));
        assert_eq!(monitor.check_once(), 0);
        assert!(router.snapshot().iter().all(|p| !p.healthy));
    }

    #[test]
    fn test_check_once_sweeps_rate_buckets() {
        let (_fast, _slow, router) = setup();
        let admission = Arc::new(AdmissionController::new(
            &SecurityConfig::default(),
            &RateLimitConfig {
                window_secs: 1,
                ..RateLimitConfig::default()
            },
        ));
        let stale = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap_or_else(Instant::now);
        admission.admit(&crate::admission::CallerIdentity::new("scheduler"), stale);
        assert_eq!(admission.tracked_identities(), 1);

        HealthMonitor::new(router, Duration::from_secs(10))
            .with_admission(admission.clone())
            .check_once();
        assert_eq!(admission.tracked_identities(), 0);
    }

    #[tokio::test]
    async fn test_run_updates_flags_and_stops_on_shutdown() {
        let (fast, _slow, router) = setup();
        fast.set_alive(false);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(
            HealthMonitor::new(router.clone(), Duration::from_millis(10)).run(rx),
        );

        for _ in 0..100 {
            if !router.pool(PoolName::Fast).is_healthy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!router.pool(PoolName::Fast).is_healthy());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
