//! Forecast Common Types
//!
//! Shared types used by the forecast server and its clients.

pub mod pool;
pub mod prediction;
pub mod status;

pub use pool::{PoolName, PoolStatus};
pub use prediction::{
    Candle, PredictBatchItem, PredictBatchRequest, PredictResponse, PredictSingleRequest,
    PredictionOverrides, PredictionPoint,
};
pub use status::{HealthResponse, ReadyResponse};
