//! Health and readiness response bodies.

use serde::{Deserialize, Serialize};

use crate::PoolStatus;

/// Body of `GET /v1/healthz`.
///
/// Always served, even when every pool is unhealthy, so liveness probes can
/// tell "process up" apart from "model usable".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Device string the operator asked for.
    pub device_requested: String,
    /// Device the model actually runs on.
    pub device_resolved: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_warning: Option<String>,
    pub pools: Vec<PoolStatus>,
}

/// Body of `GET /v1/readyz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// "ok" when at least one pool can serve, "loading" otherwise.
    pub status: String,
    pub model_loaded: bool,
}
