//! Per-pool resource wiring.

use std::collections::HashMap;
use std::sync::Arc;

use forecast_common::PoolName;

use super::InferenceResource;

/// The resources the process owns, one per pool.
///
/// Built once by top-level wiring and handed to the pool router; there is no
/// global lookup.
#[derive(Default, Clone)]
pub struct ResourceSet {
    resources: HashMap<PoolName, Arc<dyn InferenceResource>>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a resource to a pool, replacing any earlier binding.
    pub fn register(&mut self, pool: PoolName, resource: Arc<dyn InferenceResource>) {
        tracing::info!(
            "Bound {} resource on {} to {} pool",
            resource.name(),
            resource.device(),
            pool
        );
        self.resources.insert(pool, resource);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, pool: PoolName, resource: Arc<dyn InferenceResource>) -> Self {
        self.register(pool, resource);
        self
    }

    pub fn get(&self, pool: PoolName) -> Option<Arc<dyn InferenceResource>> {
        self.resources.get(&pool).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ScriptedResource;

    #[test]
    fn test_register_and_get() {
        let set = ResourceSet::new().with(PoolName::Slow, Arc::new(ScriptedResource::new()));
        assert!(set.get(PoolName::Slow).is_some());
        assert!(set.get(PoolName::Fast).is_none());
    }
}
