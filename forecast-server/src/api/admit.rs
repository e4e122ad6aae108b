//! Admission middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::admission::CallerIdentity;
use crate::error::Error;
use crate::metrics::SecurityEvent;
use crate::state::AppState;

/// Reject callers that are not whitelisted or are over their rate limit.
/// Bypass paths pass straight through.
pub async fn admit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if state.admission.bypasses(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = CallerIdentity::from_request(request.headers(), peer);

    match state.admission.check(&identity, Instant::now()) {
        Ok(()) => {
            state.metrics.record_security(SecurityEvent::Authorized);
            next.run(request).await
        }
        Err(e) => {
            let event = match &e {
                Error::RateLimited(_) => SecurityEvent::RateLimited,
                _ => SecurityEvent::Forbidden,
            };
            state.metrics.record_security(event);
            e.into_response()
        }
    }
}
