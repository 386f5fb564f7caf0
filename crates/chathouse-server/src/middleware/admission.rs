//! Admission Control Middleware
//!
//! Two orthogonal checks in front of every route, keyed by client address:
//!
//! - **Ban check**: addresses in the persisted ban list are refused with 403
//!   on every request.
//! - **Rate check**: fixed-window counter with TTL. The first request of a
//!   window starts its TTL; a request beyond the limit is refused with 429
//!   and a `Retry-After` header carrying the remaining window.
//!
//! ## Fail-open
//!
//! If the side store cannot be reached, the request is ADMITTED and the
//! failure logged. This is deliberate: the chat service stays reachable
//! during a side-store outage. Do not change this silently.
//!
//! The client address is the first `X-Forwarded-For` entry when present,
//! otherwise the socket peer address.

use axum::extract::{ConnectInfo, Request};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chathouse_store::SideStore;
use futures::future::BoxFuture;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::warn;

/// Admission layer configuration: the side store plus window limits.
#[derive(Clone)]
pub struct AdmissionLayer {
    side: Arc<dyn SideStore>,
    max_requests: u64,
    window: Duration,
}

impl AdmissionLayer {
    pub fn new(side: Arc<dyn SideStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            side,
            max_requests,
            window,
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionMiddleware {
            inner,
            side: self.side.clone(),
            max_requests: self.max_requests,
            window: self.window,
        }
    }
}

#[derive(Clone)]
pub struct AdmissionMiddleware<S> {
    inner: S,
    side: Arc<dyn SideStore>,
    max_requests: u64,
    window: Duration,
}

impl<S> Service<Request> for AdmissionMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let side = self.side.clone();
        let max_requests = self.max_requests;
        let window = self.window;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let address = client_address(&request);

            match side.is_banned(&address).await {
                Ok(true) => {
                    warn!(address = %address, "refusing banned address");
                    return Ok((
                        StatusCode::FORBIDDEN,
                        Json(json!({ "error": "Your address has been banned" })),
                    )
                        .into_response());
                }
                Ok(false) => {}
                Err(e) => {
                    // Fail open: availability over enforcement during a
                    // side-store outage.
                    warn!(error = %e, address = %address, "ban check unavailable, admitting");
                }
            }

            match side
                .counter_incr(&format!("ratelimit:{address}"), window)
                .await
            {
                Ok(sample) if sample.count > max_requests => {
                    let retry_after = sample.retry_after.as_secs().max(1);
                    return Ok((
                        StatusCode::TOO_MANY_REQUESTS,
                        [(header::RETRY_AFTER, retry_after.to_string())],
                        Json(json!({
                            "error": "Too many requests. Please try again later.",
                            "retry_after": retry_after,
                        })),
                    )
                        .into_response());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, address = %address, "rate counter unavailable, admitting");
                }
            }

            inner.call(request).await
        })
    }
}

/// The address admission is keyed by.
fn client_address(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
