//! Pool handles: capacity, occupancy and health of one worker pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use forecast_common::{PoolName, PoolStatus};
use tokio::sync::Semaphore;

use crate::engine::InferenceResource;

/// One pool of worker slots in front of a single resource.
///
/// `in_flight` only moves through the execution gate's slot guard, and only
/// while a semaphore permit is held, so it never exceeds `capacity`.
pub struct PoolHandle {
    name: PoolName,
    capacity: usize,
    slots: Arc<Semaphore>,
    in_flight: AtomicUsize,
    healthy: AtomicBool,
    last_saturated: Mutex<Option<Instant>>,
    resource: Arc<dyn InferenceResource>,
}

impl PoolHandle {
    pub fn new(name: PoolName, capacity: usize, resource: Arc<dyn InferenceResource>) -> Self {
        Self {
            name,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            in_flight: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            last_saturated: Mutex::new(None),
            resource,
        }
    }

    pub fn name(&self) -> PoolName {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Record a liveness signal. Returns the previous value.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::SeqCst)
    }

    /// When an acquisition last filled every slot, if ever.
    pub fn last_saturated(&self) -> Option<Instant> {
        *self
            .last_saturated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn resource(&self) -> Arc<dyn InferenceResource> {
        self.resource.clone()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            name: self.name,
            healthy: self.is_healthy(),
            in_flight: self.in_flight(),
            capacity: self.capacity,
            device: self.resource.device().to_string(),
        }
    }

    pub(super) fn slots(&self) -> Arc<Semaphore> {
        self.slots.clone()
    }

    /// Count a newly acquired slot. Returns the occupancy after the increment.
    pub(super) fn enter(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if now >= self.capacity {
            self.mark_saturated(Instant::now());
        }
        now
    }

    pub(super) fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_saturated(&self, at: Instant) {
        *self
            .last_saturated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ScriptedResource;

    #[test]
    fn test_new_pool_is_idle_and_healthy() {
        let pool = PoolHandle::new(PoolName::Fast, 2, Arc::new(ScriptedResource::new()));
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.is_healthy());
        assert!(pool.last_saturated().is_none());
    }

    #[test]
    fn test_enter_records_saturation_at_capacity() {
        let pool = PoolHandle::new(PoolName::Slow, 2, Arc::new(ScriptedResource::new()));
        pool.enter();
        assert!(pool.last_saturated().is_none());
        pool.enter();
        assert!(pool.last_saturated().is_some());
        pool.leave();
        pool.leave();
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_status_snapshot() {
        let pool = PoolHandle::new(PoolName::Slow, 3, Arc::new(ScriptedResource::new()));
        assert!(pool.set_healthy(false));
        let status = pool.status();
        assert_eq!(status.name, PoolName::Slow);
        assert!(!status.healthy);
        assert_eq!(status.capacity, 3);
        assert_eq!(status.device, "cpu");
    }
}
