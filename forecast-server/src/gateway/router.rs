//! Pool router: picks the fast or slow pool for each job.

use std::sync::Arc;

use forecast_common::{PoolName, PoolStatus};

use super::job::JobShape;
use super::pool::PoolHandle;
use crate::config::{Classification, PoolsConfig};
use crate::engine::ResourceSet;
use crate::error::{Error, Result};

/// Router over the fast and slow pools.
///
/// Selection reads the health flags written by the health monitor and never
/// probes a resource itself.
pub struct PoolRouter {
    fast: Arc<PoolHandle>,
    slow: Arc<PoolHandle>,
    classification: Classification,
}

impl PoolRouter {
    pub fn new(
        fast: Arc<PoolHandle>,
        slow: Arc<PoolHandle>,
        classification: Classification,
    ) -> Self {
        Self {
            fast,
            slow,
            classification,
        }
    }

    /// Build both pools from the process's resources.
    pub fn from_resources(
        resources: &ResourceSet,
        pools: &PoolsConfig,
        classification: Classification,
    ) -> Result<Self> {
        let build = |name: PoolName| {
            let resource = resources.get(name).ok_or_else(|| {
                Error::InvalidConfig(format!("no resource bound to {} pool", name))
            })?;
            Ok::<_, Error>(Arc::new(PoolHandle::new(name, pools.capacity(name), resource)))
        };
        Ok(Self::new(
            build(PoolName::Fast)?,
            build(PoolName::Slow)?,
            classification,
        ))
    }

    pub fn pool(&self, name: PoolName) -> &Arc<PoolHandle> {
        match name {
            PoolName::Fast => &self.fast,
            PoolName::Slow => &self.slow,
        }
    }

    pub fn pools(&self) -> [&Arc<PoolHandle>; 2] {
        [&self.fast, &self.slow]
    }

    /// Snapshot of every pool, fast first.
    pub fn snapshot(&self) -> Vec<PoolStatus> {
        self.pools().iter().map(|p| p.status()).collect()
    }

    /// Choose the pool for a job.
    ///
    /// 1. A healthy override wins.
    /// 2. Otherwise the shape's preferred pool, failing over to the other
    ///    pool when the preferred one is unhealthy.
    /// 3. Unclassified shapes go to the least recently saturated healthy pool.
    pub fn select_pool(
        &self,
        shape: JobShape,
        override_pool: Option<PoolName>,
    ) -> Result<Arc<PoolHandle>> {
        if let Some(name) = override_pool {
            let pool = self.pool(name);
            if pool.is_healthy() {
                return Ok(pool.clone());
            }
            tracing::warn!("Requested {} pool is unhealthy, applying routing rules", name);
        }

        let preferred = match shape {
            JobShape::Single => self.classification.single,
            JobShape::Batch => self.classification.batch,
        };

        let selected = match preferred {
            Some(name) => self.with_failover(name),
            None => self.least_recently_saturated(),
        };

        match selected {
            Some(pool) => Ok(pool.clone()),
            None => {
                tracing::error!(
                    shape = shape.as_str(),
                    "No healthy pool available, all capacity lost"
                );
                Err(Error::NoHealthyPool)
            }
        }
    }

    fn with_failover(&self, preferred: PoolName) -> Option<&Arc<PoolHandle>> {
        let pool = self.pool(preferred);
        if pool.is_healthy() {
            return Some(pool);
        }
        let other = self.pool(preferred.other());
        if other.is_healthy() {
            tracing::warn!(
                "{} pool is unhealthy, failing over to {} pool",
                preferred,
                other.name()
            );
            return Some(other);
        }
        None
    }

    fn least_recently_saturated(&self) -> Option<&Arc<PoolHandle>> {
        match (self.fast.is_healthy(), self.slow.is_healthy()) {
            (true, true) => match (self.fast.last_saturated(), self.slow.last_saturated()) {
                (Some(fast), Some(slow)) if slow < fast => Some(&self.slow),
                (Some(_), None) => Some(&self.slow),
                _ => Some(&self.fast),
            },
            (true, false) => Some(&self.fast),
            (false, true) => Some(&self.slow),
            (false, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ScriptedResource;
    use std::time::{Duration, Instant};

    fn router(classification: Classification) -> PoolRouter {
        let resources = ResourceSet::new()
            .with(PoolName::Fast, Arc::new(ScriptedResource::new()))
            .with(PoolName::Slow, Arc::new(ScriptedResource::new()));
        let pools = PoolsConfig {
            fast_capacity: 2,
            slow_capacity: 1,
        };
        PoolRouter::from_resources(&resources, &pools, classification).unwrap()
    }

    fn unclassified() -> Classification {
        Classification {
            single: None,
            batch: None,
        }
    }

    #[test]
    fn test_missing_resource_is_config_error() {
        let resources = ResourceSet::new().with(PoolName::Fast, Arc::new(ScriptedResource::new()));
        let result = PoolRouter::from_resources(
            &resources,
            &PoolsConfig::default(),
            Classification::default(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_classification_defaults() {
        let router = router(Classification::default());
        assert_eq!(
            router.select_pool(JobShape::Single, None).unwrap().name(),
            PoolName::Fast
        );
        assert_eq!(
            router.select_pool(JobShape::Batch, None).unwrap().name(),
            PoolName::Slow
        );
    }

    #[test]
    fn test_override_wins_over_classification() {
        let router = router(Classification::default());
        assert_eq!(
            router
                .select_pool(JobShape::Batch, Some(PoolName::Fast))
                .unwrap()
                .name(),
            PoolName::Fast
        );
        assert_eq!(
            router
                .select_pool(JobShape::Single, Some(PoolName::Slow))
                .unwrap()
                .name(),
            PoolName::Slow
        );
    }

    #[test]
    fn test_unhealthy_override_falls_back_to_rules() {
        let router = router(Classification::default());
        router.pool(PoolName::Fast).set_healthy(false);
        assert_eq!(
            router
                .select_pool(JobShape::Batch, Some(PoolName::Fast))
                .unwrap()
                .name(),
            PoolName::Slow
        );
    }

    #[test]
    fn test_failover_when_preferred_is_down() {
        let router = router(Classification::default());
        router.pool(PoolName::Fast).set_healthy(false);
        assert_eq!(
            router.select_pool(JobShape::Single, None).unwrap().name(),
            PoolName::Slow
        );
    }

    #[test]
    fn test_no_healthy_pool() {
        let router = router(Classification::default());
        router.pool(PoolName::Fast).set_healthy(false);
        router.pool(PoolName::Slow).set_healthy(false);
        assert!(matches!(
            router.select_pool(JobShape::Single, None),
            Err(Error::NoHealthyPool)
        ));
        assert!(matches!(
            router.select_pool(JobShape::Batch, Some(PoolName::Slow)),
            Err(Error::NoHealthyPool)
        ));
    }

    #[test]
    fn test_tie_break_defaults_to_fast() {
        let router = router(unclassified());
        assert_eq!(
            router.select_pool(JobShape::Single, None).unwrap().name(),
            PoolName::Fast
        );
    }

    #[test]
    fn test_tie_break_prefers_least_recently_saturated() {
        let router = router(unclassified());
        let earlier = Instant::now();
        let later = earlier + Duration::from_secs(5);

        router.pool(PoolName::Fast).mark_saturated(earlier);
        assert_eq!(
            router.select_pool(JobShape::Batch, None).unwrap().name(),
            PoolName::Slow
        );

        router.pool(PoolName::Slow).mark_saturated(later);
        assert_eq!(
            router.select_pool(JobShape::Batch, None).unwrap().name(),
            PoolName::Fast
        );
    }

    #[test]
    fn test_tie_break_uses_only_healthy_pool() {
        let router = router(unclassified());
        router.pool(PoolName::Fast).set_healthy(false);
        assert_eq!(
            router.select_pool(JobShape::Single, None).unwrap().name(),
            PoolName::Slow
        );
    }

    #[test]
    fn test_snapshot_lists_both_pools() {
        let router = router(Classification::default());
        let snapshot = router.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, PoolName::Fast);
        assert_eq!(snapshot[0].capacity, 2);
        assert_eq!(snapshot[1].capacity, 1);
    }
}
