//! Inference job lifecycle.

use std::sync::Arc;
use std::time::Instant;

use forecast_common::PoolName;
use uuid::Uuid;

use crate::engine::PredictionInput;
use crate::error::{Error, Result};

/// Shape of a job, used by the routing classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobShape {
    Single,
    Batch,
}

impl JobShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
        }
    }
}

/// `Queued -> Running -> {Done, TimedOut, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    TimedOut,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::TimedOut | Self::Failed)
    }
}

/// A unit of work travelling through router and gate.
#[derive(Debug)]
pub struct InferenceJob {
    id: Uuid,
    shape: JobShape,
    payload: Arc<PredictionInput>,
    pool: Option<PoolName>,
    deadline: Option<Instant>,
    state: JobState,
}

impl InferenceJob {
    pub fn new(shape: JobShape, payload: PredictionInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            shape,
            payload: Arc::new(payload),
            pool: None,
            deadline: None,
            state: JobState::Queued,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn shape(&self) -> JobShape {
        self.shape
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Pool the job was routed to, once routed.
    pub fn pool(&self) -> Option<PoolName> {
        self.pool
    }

    /// Wall-clock deadline, set when a worker slot is acquired.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn payload(&self) -> &PredictionInput {
        &self.payload
    }

    pub(crate) fn shared_payload(&self) -> Arc<PredictionInput> {
        self.payload.clone()
    }

    pub(crate) fn assign(&mut self, pool: PoolName) {
        self.pool = Some(pool);
    }

    pub(crate) fn start(&mut self, deadline: Instant) -> Result<()> {
        if self.state != JobState::Queued {
            return Err(self.illegal(JobState::Running));
        }
        self.state = JobState::Running;
        self.deadline = Some(deadline);
        Ok(())
    }

    pub(crate) fn finish(&mut self, state: JobState) -> Result<()> {
        if self.state != JobState::Running || !state.is_terminal() {
            return Err(self.illegal(state));
        }
        self.state = state;
        Ok(())
    }

    fn illegal(&self, to: JobState) -> Error {
        Error::Internal(format!(
            "job {} cannot move from {:?} to {:?}",
            self.id, self.state, to
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PredictionParams;

    fn job() -> InferenceJob {
        InferenceJob::new(
            JobShape::Single,
            PredictionInput {
                series: vec![],
                params: PredictionParams {
                    pred_len: 1,
                    temperature: 1.0,
                    top_k: 0,
                    top_p: 0.9,
                    sample_count: 1,
                },
            },
        )
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        assert_eq!(job.state(), JobState::Queued);
        assert!(job.deadline().is_none());

        job.start(Instant::now()).unwrap();
        assert_eq!(job.state(), JobState::Running);
        assert!(job.deadline().is_some());

        job.finish(JobState::Done).unwrap();
        assert_eq!(job.state(), JobState::Done);
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut job = job();
        assert!(job.finish(JobState::Done).is_err());
        assert_eq!(job.state(), JobState::Queued);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = job();
        job.start(Instant::now()).unwrap();
        job.finish(JobState::TimedOut).unwrap();
        assert!(job.finish(JobState::Done).is_err());
        assert!(job.start(Instant::now()).is_err());
        assert_eq!(job.state(), JobState::TimedOut);
    }

    #[test]
    fn test_running_is_not_a_terminal_target() {
        let mut job = job();
        job.start(Instant::now()).unwrap();
        assert!(job.finish(JobState::Running).is_err());
    }
}
