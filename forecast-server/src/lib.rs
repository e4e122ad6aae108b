//! Forecast Server - admits, routes and executes predictions against a
//! model that can only serve a bounded number of callers at once.

pub mod admission;
pub mod api;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod state;
pub mod test_util;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
