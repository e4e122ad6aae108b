//! In-process counters rendered in Prometheus text format.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Mutex;
use std::time::Duration;

use forecast_common::PoolStatus;

use crate::error::Error;

/// How a prediction request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    Timeout,
    Error,
    /// Refused before any inference ran.
    Rejected,
}

impl Outcome {
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::PredictionTimeout(_) => Outcome::Timeout,
            Error::InvalidRequest(_)
            | Error::Forbidden(_)
            | Error::RateLimited(_)
            | Error::NoHealthyPool => Outcome::Rejected,
            _ => Outcome::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Timeout => "timeout",
            Outcome::Error => "error",
            Outcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityEvent {
    Authorized,
    Forbidden,
    RateLimited,
}

impl SecurityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::Authorized => "authorized",
            SecurityEvent::Forbidden => "forbidden",
            SecurityEvent::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: BTreeMap<(&'static str, Outcome), u64>,
    latency: BTreeMap<&'static str, (f64, u64)>,
    security: BTreeMap<SecurityEvent, u64>,
}

#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, route: &'static str, outcome: Outcome, elapsed: Duration) {
        let mut counters = self.lock();
        *counters.requests.entry((route, outcome)).or_default() += 1;
        let latency = counters.latency.entry(route).or_default();
        latency.0 += elapsed.as_secs_f64();
        latency.1 += 1;
    }

    pub fn record_security(&self, event: SecurityEvent) {
        *self.lock().security.entry(event).or_default() += 1;
    }

    pub fn request_count(&self, route: &str, outcome: Outcome) -> u64 {
        self.lock()
            .requests
            .iter()
            .filter(|((r, o), _)| *r == route && *o == outcome)
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn security_count(&self, event: SecurityEvent) -> u64 {
        self.lock().security.get(&event).copied().unwrap_or(0)
    }

    /// Render all counters plus the given pool gauges.
    pub fn render(&self, pools: &[PoolStatus]) -> String {
        let counters = self.lock();
        let mut out = String::new();

        let _ = writeln!(out, "# HELP forecast_up Whether the service is up");
        let _ = writeln!(out, "# TYPE forecast_up gauge");
        let _ = writeln!(out, "forecast_up 1");
        let _ = writeln!(out, "# HELP forecast_info Service information");
        let _ = writeln!(out, "# TYPE forecast_info gauge");
        let _ = writeln!(
            out,
            "forecast_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        );

        let _ = writeln!(
            out,
            "# HELP forecast_requests_total Prediction requests by route and outcome"
        );
        let _ = writeln!(out, "# TYPE forecast_requests_total counter");
        for ((route, outcome), count) in &counters.requests {
            let _ = writeln!(
                out,
                "forecast_requests_total{{route=\"{}\",outcome=\"{}\"}} {}",
                route,
                outcome.as_str(),
                count
            );
        }

        let _ = writeln!(
            out,
            "# HELP forecast_request_duration_seconds Prediction request latency"
        );
        let _ = writeln!(out, "# TYPE forecast_request_duration_seconds summary");
        for (route, (sum, count)) in &counters.latency {
            let _ = writeln!(
                out,
                "forecast_request_duration_seconds_sum{{route=\"{}\"}} {:.6}",
                route, sum
            );
            let _ = writeln!(
                out,
                "forecast_request_duration_seconds_count{{route=\"{}\"}} {}",
                route, count
            );
        }

        let _ = writeln!(out, "# HELP forecast_security_events_total Admission decisions");
        let _ = writeln!(out, "# TYPE forecast_security_events_total counter");
        for (event, count) in &counters.security {
            let _ = writeln!(
                out,
                "forecast_security_events_total{{event=\"{}\"}} {}",
                event.as_str(),
                count
            );
        }

        let _ = writeln!(out, "# HELP forecast_pool_in_flight Jobs currently holding a slot");
        let _ = writeln!(out, "# TYPE forecast_pool_in_flight gauge");
        for pool in pools {
            let _ = writeln!(
                out,
                "forecast_pool_in_flight{{pool=\"{}\"}} {}",
                pool.name, pool.in_flight
            );
        }
        let _ = writeln!(out, "# HELP forecast_pool_capacity Worker slots per pool");
        let _ = writeln!(out, "# TYPE forecast_pool_capacity gauge");
        for pool in pools {
            let _ = writeln!(
                out,
                "forecast_pool_capacity{{pool=\"{}\"}} {}",
                pool.name, pool.capacity
            );
        }
        let _ = writeln!(out, "# HELP forecast_pool_healthy Pool health flag");
        let _ = writeln!(out, "# TYPE forecast_pool_healthy gauge");
        for pool in pools {
            let _ = writeln!(
                out,
                "forecast_pool_healthy{{pool=\"{}\",device=\"{}\"}} {}",
                pool.name,
                pool.device,
                u8::from(pool.healthy)
            );
        }

        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
