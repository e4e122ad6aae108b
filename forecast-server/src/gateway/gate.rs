//! Execution gate: bounded, timeout-enforced bridge from async handlers to
//! the blocking inference call.
//!
//! A job waits cooperatively for a pool slot, then runs on tokio's blocking
//! pool. The slot guard travels into the blocking closure, so the slot is
//! returned when the model call actually ends, not when the caller stops
//! waiting. Pool occupancy therefore reflects real work even after a timeout
//! or a client disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedSemaphorePermit;

use super::job::{InferenceJob, JobState};
use super::pool::PoolHandle;
use crate::engine::PredictionOutput;
use crate::error::{Error, Result};

/// Scoped ownership of one worker slot.
///
/// Dropping the guard decrements `in_flight` before the permit is returned,
/// so occupancy never reads above capacity.
struct SlotGuard {
    pool: Arc<PoolHandle>,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    async fn acquire(pool: Arc<PoolHandle>) -> Result<Self> {
        let permit = pool
            .slots()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("Semaphore error: {}", e)))?;
        pool.enter();
        Ok(Self {
            pool,
            _permit: permit,
        })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.leave();
    }
}

/// Runs jobs against pools.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionGate;

impl ExecutionGate {
    pub fn new() -> Self {
        Self
    }

    /// Run `job` on `pool`, waiting at most `timeout` once a slot is held.
    ///
    /// Errors are never retried here. On timeout the blocking call is
    /// abandoned and its result discarded.
    pub async fn execute(
        &self,
        job: &mut InferenceJob,
        pool: &Arc<PoolHandle>,
        timeout: Duration,
    ) -> Result<PredictionOutput> {
        job.assign(pool.name());
        let guard = SlotGuard::acquire(pool.clone()).await?;
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            Error::InvalidConfig(format!("timeout of {:?} is out of range", timeout))
        })?;
        job.start(deadline)?;

        tracing::debug!(
            job_id = %job.id(),
            pool = %pool.name(),
            in_flight = pool.in_flight(),
            capacity = pool.capacity(),
            "Job running"
        );

        let resource = pool.resource();
        let payload = job.shared_payload();
        let worker = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            resource.infer(&payload)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(Ok(output))) => {
                job.finish(JobState::Done)?;
                Ok(output)
            }
            Ok(Ok(Err(e))) => {
                job.finish(JobState::Failed)?;
                tracing::warn!(job_id = %job.id(), pool = %pool.name(), "Inference failed: {}", e);
                Err(Error::InferenceFailed {
                    cause: e.to_string(),
                })
            }
            Ok(Err(join_error)) => {
                job.finish(JobState::Failed)?;
                tracing::error!(
                    job_id = %job.id(),
                    pool = %pool.name(),
                    "Inference worker crashed: {}",
                    join_error
                );
                Err(Error::InferenceFailed {
                    cause: format!("worker crashed: {}", join_error),
                })
            }
            Err(_) => {
                job.finish(JobState::TimedOut)?;
                tracing::error!(
                    job_id = %job.id(),
                    pool = %pool.name(),
                    timeout_seconds = timeout.as_secs_f64(),
                    "Prediction timeout"
                );
                Err(Error::PredictionTimeout(timeout))
            }
        }
    }
}
