//! Per-caller admission control: whitelist, fixed-window rate limiting and
//! the health-check bypass list.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;

use crate::config::{RateLimitConfig, SecurityConfig};
use crate::error::{Error, Result};

/// Header a calling container may set to identify itself.
pub const CALLER_HEADER: &str = "x-container-name";

/// Identity every loopback peer without a caller header maps to.
pub const LOOPBACK_IDENTITY: &str = "localhost";

/// Key used for whitelist and rate-limit lookups.
///
/// `loopback` records whether the connection itself came from the local
/// host. Only that flag exempts a caller from the whitelist; a header can
/// never set it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    key: String,
    loopback: bool,
}

impl CallerIdentity {
    /// A remote caller.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            loopback: false,
        }
    }

    /// A caller connected over the loopback interface.
    pub fn local(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            loopback: true,
        }
    }

    /// Derive the identity of a request.
    ///
    /// The `X-Container-Name` header wins; otherwise the peer address is
    /// used, with loopback peers collapsed to `localhost`.
    pub fn from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        // IPv4-mapped peers on a dual-stack listener arrive as `::ffff:a.b.c.d`.
        let peer_ip = peer.map(|addr| addr.ip().to_canonical());
        let loopback = peer_ip.is_some_and(|ip| ip.is_loopback());

        let key = match headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            Some(name) => name.to_string(),
            None => match peer_ip {
                Some(_) if loopback => LOOPBACK_IDENTITY.to_string(),
                Some(ip) => ip.to_string(),
                None => "unknown".to_string(),
            },
        };

        Self { key, loopback }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_loopback(&self) -> bool {
        self.loopback
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Outcome of [`AdmissionController::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    RateLimited,
    Forbidden,
}

/// Fixed-window counter for one identity.
#[derive(Debug)]
struct RateBucket {
    window_start: Instant,
    count: u64,
}

/// Whitelist and rate-limit gate in front of every non-bypassed route.
///
/// Buckets are created lazily, only for identities that passed the
/// whitelist, so scans from unknown callers allocate nothing.
pub struct AdmissionController {
    whitelist_enabled: bool,
    whitelist: HashSet<String>,
    rate_limit_enabled: bool,
    window: Duration,
    limit: u64,
    bypass_paths: HashSet<String>,
    buckets: DashMap<String, RateBucket>,
}

impl AdmissionController {
    pub fn new(security: &SecurityConfig, rate_limit: &RateLimitConfig) -> Self {
        if security.enabled {
            tracing::info!("Caller whitelist enabled: {:?}", security.whitelist);
        } else {
            tracing::warn!("Caller whitelist DISABLED - all callers allowed");
        }

        Self {
            whitelist_enabled: security.enabled,
            whitelist: security.whitelist_set(),
            rate_limit_enabled: rate_limit.enabled,
            window: rate_limit.window(),
            limit: rate_limit.max_requests,
            bypass_paths: security.bypass_paths.iter().cloned().collect(),
            buckets: DashMap::new(),
        }
    }

    /// Whether `path` skips admission entirely.
    pub fn bypasses(&self, path: &str) -> bool {
        self.bypass_paths.contains(path)
    }

    /// Decide whether a request from `identity` at `now` may proceed.
    ///
    /// The whitelist is checked before any rate-limit state is touched. Only
    /// an `Allow` increments the window counter.
    pub fn admit(&self, identity: &CallerIdentity, now: Instant) -> AdmissionDecision {
        if self.whitelist_enabled
            && !identity.is_loopback()
            && !self.whitelist.contains(identity.key())
        {
            return AdmissionDecision::Forbidden;
        }

        if !self.rate_limit_enabled {
            return AdmissionDecision::Allow;
        }

        let mut bucket = self
            .buckets
            .entry(identity.key().to_string())
            .or_insert_with(|| RateBucket {
                window_start: now,
                count: 0,
            });

        if now.saturating_duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count < self.limit {
            bucket.count += 1;
            AdmissionDecision::Allow
        } else {
            AdmissionDecision::RateLimited
        }
    }

    /// [`admit`](Self::admit) mapped onto the error taxonomy.
    pub fn check(&self, identity: &CallerIdentity, now: Instant) -> Result<()> {
        match self.admit(identity, now) {
            AdmissionDecision::Allow => {
                tracing::debug!(caller = %identity, "Authorized request");
                Ok(())
            }
            AdmissionDecision::Forbidden => {
                tracing::warn!(caller = %identity, "Unauthorized access attempt");
                Err(Error::Forbidden(identity.key().to_string()))
            }
            AdmissionDecision::RateLimited => {
                tracing::warn!(caller = %identity, limit = self.limit, "Rate limit exceeded");
                Err(Error::RateLimited(identity.key().to_string()))
            }
        }
    }

    /// Drop buckets idle for more than two windows. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let horizon = self.window.saturating_mul(2);
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < horizon);
        before - self.buckets.len()
    }

    /// Number of identities with live rate-limit state.
    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }
}
