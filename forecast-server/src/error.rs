//! Error types for the forecast server.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error types for admission, routing and execution.
///
/// Nothing in the server retries on its own; `is_retryable` tells callers
/// which failures are worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid device spec: {0}")]
    InvalidDeviceSpec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Forbidden: caller '{0}' is not whitelisted")]
    Forbidden(String),

    #[error("Rate limit exceeded for caller '{0}'")]
    RateLimited(String),

    #[error("No healthy pool available")]
    NoHealthyPool,

    #[error("Prediction timeout after {} seconds", .0.as_secs_f64())]
    PredictionTimeout(Duration),

    #[error("Inference failed: {cause}")]
    InferenceFailed { cause: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PredictionTimeout(_) | Error::RateLimited(_))
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            Error::InvalidDeviceSpec(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_device_spec")
            }
            Error::InvalidConfig(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_config"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Error::NoHealthyPool => (StatusCode::SERVICE_UNAVAILABLE, "no_healthy_pool"),
            Error::PredictionTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "prediction_timeout"),
            Error::InferenceFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "inference_failed")
            }
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
