//! Pools, routing and bounded execution.
//!
//! A request becomes an [`InferenceJob`], the [`PoolRouter`] picks a pool,
//! and the [`ExecutionGate`] runs the job in one of that pool's slots under
//! a deadline. The [`HealthMonitor`] keeps pool health flags current.

mod gate;
mod health;
mod job;
mod pool;
mod router;

pub use gate::ExecutionGate;
pub use health::HealthMonitor;
pub use job::{InferenceJob, JobShape, JobState};
pub use pool::PoolHandle;
pub use router::PoolRouter;
