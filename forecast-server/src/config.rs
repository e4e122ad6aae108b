//! Configuration for the forecast server.

use std::collections::HashSet;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use forecast_common::PoolName;
use serde::Deserialize;

use crate::device::DeviceSpec;
use crate::error::{Error, Result};

/// Main configuration structure for the forecast server.
///
/// Every section has defaults, so an empty environment yields a working
/// single-host setup.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request bodies above this size are rejected.
    #[serde(default = "default_max_request_size_mb")]
    pub max_request_size_mb: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_size_mb: default_max_request_size_mb(),
        }
    }
}

/// Compute device selection.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// `auto`, `cpu`, `cuda[:N]`, `gpu[:N]`, `accel[:N]` or `mps[:N]`.
    #[serde(default = "default_device")]
    pub selection: String,
    /// Overrides the probed number of CUDA-class accelerators.
    #[serde(default)]
    pub accelerators: Option<u32>,
    /// Overrides the probed number of MPS-class devices.
    #[serde(default)]
    pub other: Option<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            selection: default_device(),
            accelerators: None,
            other: None,
        }
    }
}

/// Worker capacity per pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolsConfig {
    #[serde(default = "default_fast_capacity")]
    pub fast_capacity: usize,
    #[serde(default = "default_slow_capacity")]
    pub slow_capacity: usize,
}

impl PoolsConfig {
    pub fn capacity(&self, pool: PoolName) -> usize {
        match pool {
            PoolName::Fast => self.fast_capacity,
            PoolName::Slow => self.slow_capacity,
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            fast_capacity: default_fast_capacity(),
            slow_capacity: default_slow_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Hard per-job deadline, measured from worker slot acquisition.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Pool routing rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Preferred pool for single-series jobs. Empty or "none" leaves them unclassified.
    #[serde(default = "default_single_pool")]
    pub single_pool: String,
    /// Preferred pool for batch jobs. Empty or "none" leaves them unclassified.
    #[serde(default = "default_batch_pool")]
    pub batch_pool: String,
    /// How often pool liveness is sampled.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

impl RoutingConfig {
    /// Parse the classification rule.
    pub fn classification(&self) -> Result<Classification> {
        Ok(Classification {
            single: parse_pool_rule("routing.single_pool", &self.single_pool)?,
            batch: parse_pool_rule("routing.batch_pool", &self.batch_pool)?,
        })
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            single_pool: default_single_pool(),
            batch_pool: default_batch_pool(),
            health_interval_secs: default_health_interval(),
        }
    }
}

/// Static job-shape to pool mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub single: Option<PoolName>,
    pub batch: Option<PoolName>,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            single: Some(PoolName::Fast),
            batch: Some(PoolName::Slow),
        }
    }
}

fn parse_pool_rule(key: &str, value: &str) -> Result<Option<PoolName>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    PoolName::parse(value)
        .map(Some)
        .ok_or_else(|| Error::InvalidConfig(format!("{}: unknown pool '{}'", key, value)))
}

/// Caller whitelist.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,
    /// Paths that skip admission entirely (liveness probes, metrics scrapes).
    #[serde(default = "default_bypass_paths")]
    pub bypass_paths: Vec<String>,
}

impl SecurityConfig {
    pub fn whitelist_set(&self) -> HashSet<String> {
        self.whitelist
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelist: default_whitelist(),
            bypass_paths: default_bypass_paths(),
        }
    }
}

/// Fixed-window rate limiting per caller identity.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
        }
    }
}

/// Model context and sampling defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    /// Only this many trailing candles are fed to the model.
    #[serde(default = "default_max_context")]
    pub max_context: usize,
    /// Normalized inputs are clipped to +/- this many standard deviations.
    #[serde(default = "default_clip")]
    pub clip: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_context: default_max_context(),
            clip: default_clip(),
            temperature: default_temperature(),
            top_k: 0,
            top_p: default_top_p(),
            sample_count: default_sample_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Upper bound for `execution.timeout_secs`.
pub const MAX_TIMEOUT_SECS: u64 = 3600;
/// Upper bound for `rate_limit.window_secs`.
pub const MAX_WINDOW_SECS: u64 = 86_400;

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_request_size_mb() -> usize {
    10
}
fn default_device() -> String {
    "auto".to_string()
}
fn default_fast_capacity() -> usize {
    1
}
fn default_slow_capacity() -> usize {
    2
}
fn default_timeout_secs() -> u64 {
    240
}
fn default_single_pool() -> String {
    "fast".to_string()
}
fn default_batch_pool() -> String {
    "slow".to_string()
}
fn default_health_interval() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_whitelist() -> Vec<String> {
    ["localhost", "frontend-app", "worker-service", "scheduler"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_bypass_paths() -> Vec<String> {
    ["/v1/healthz", "/v1/readyz", "/metrics", "/v1/metrics"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_window_secs() -> u64 {
    60
}
fn default_max_requests() -> u64 {
    100
}
fn default_max_context() -> usize {
    512
}
fn default_clip() -> f64 {
    5.0
}
fn default_temperature() -> f64 {
    1.0
}
fn default_top_p() -> f64 {
    0.9
}
fn default_sample_count() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (FORECAST__SECTION__KEY format, lists comma-separated)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Same as [`Config::load`], reading the optional file at `path`.
    pub fn load_from(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("FORECAST")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.whitelist")
                    .with_list_parse_key("security.bypass_paths")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations that must never reach the serving path.
    ///
    /// A malformed device string is fatal here; only runtime unavailability
    /// of a well-formed device degrades to CPU.
    pub fn validate(&self) -> Result<()> {
        DeviceSpec::parse(&self.device.selection)?;

        for pool in PoolName::ALL {
            if self.pools.capacity(pool) == 0 {
                return Err(Error::InvalidConfig(format!(
                    "pools.{}_capacity must be at least 1",
                    pool
                )));
            }
        }
        if self.execution.timeout_secs == 0 || self.execution.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::InvalidConfig(format!(
                "execution.timeout_secs must be between 1 and {}",
                MAX_TIMEOUT_SECS
            )));
        }
        if self.routing.health_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "routing.health_interval_secs must be positive".to_string(),
            ));
        }
        self.routing.classification()?;
        if self.rate_limit.window_secs == 0 || self.rate_limit.window_secs > MAX_WINDOW_SECS {
            return Err(Error::InvalidConfig(format!(
                "rate_limit.window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            )));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(Error::InvalidConfig(
                "rate_limit.max_requests must be at least 1".to_string(),
            ));
        }
        if self.prediction.max_context == 0 {
            return Err(Error::InvalidConfig(
                "prediction.max_context must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.device.selection, "auto");
        assert_eq!(config.pools.fast_capacity, 1);
        assert_eq!(config.pools.slow_capacity, 2);
        assert_eq!(config.execution.timeout(), Duration::from_secs(240));
        assert_eq!(config.rate_limit.max_requests, 100);
        assert!(config.security.whitelist_set().contains("localhost"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_classification() {
        let classification = RoutingConfig::default().classification().unwrap();
        assert_eq!(classification, Classification::default());
    }

    #[test]
    fn test_unclassified_rule() {
        let routing = RoutingConfig {
            single_pool: "none".to_string(),
            batch_pool: "".to_string(),
            ..RoutingConfig::default()
        };
        let classification = routing.classification().unwrap();
        assert_eq!(classification.single, None);
        assert_eq!(classification.batch, None);
    }

    #[test]
    fn test_validate_rejects_bad_device() {
        let mut config = Config::default();
        config.device.selection = "tpu:0".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidDeviceSpec(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.pools.slow_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_bounds_timeout_and_window() {
        let mut config = Config::default();
        config.execution.timeout_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.execution.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(config.validate().is_ok());

        config.rate_limit.window_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.rate_limit.window_secs = MAX_WINDOW_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_pool_rule() {
        let mut config = Config::default();
        config.routing.batch_pool = "medium".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_whitelist_set_trims_entries() {
        let security = SecurityConfig {
            whitelist: vec![" worker ".to_string(), "".to_string()],
            ..SecurityConfig::default()
        };
        let set = security.whitelist_set();
        assert_eq!(set.len(), 1);
        assert!(set.contains("worker"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[device]
selection = "cuda:1"

[pools]
fast_capacity = 3

[rate_limit]
max_requests = 5
"#
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.device.selection, "cuda:1");
        assert_eq!(config.pools.fast_capacity, 3);
        assert_eq!(config.pools.slow_capacity, 2);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
    }
}
