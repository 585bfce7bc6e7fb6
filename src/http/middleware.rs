//! Request middleware: concurrency cap, rate limit admission and access
//! logging.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::http::request::client_key;
use crate::http::response::envelope;
use crate::limiter::store::Store;
use crate::observability::metrics;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Caps in-flight requests at `listener.max_connections`. Requests over
/// the cap wait for a permit instead of being rejected.
pub async fn concurrency_limit(
    State(limit): State<Arc<Semaphore>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match limit.acquire().await {
        Ok(_permit) => next.run(request).await,
        Err(_) => envelope(StatusCode::SERVICE_UNAVAILABLE, "server shutting down"),
    }
}

/// Shared handle the rate limit middleware runs against.
#[derive(Clone)]
pub struct RateLimiterHandle {
    pub store: Arc<Store>,
    pub enabled: bool,
}

/// Admission check in front of the proxy routes.
///
/// A denied request never reaches backend selection. A store failure is
/// surfaced as 500 rather than silently admitting the request.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiterHandle>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.enabled {
        return next.run(request).await;
    }

    let key = client_key(&addr);
    match limiter.store.allow(&key).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            tracing::warn!(client = %key, "Rate limit exceeded");
            metrics::record_rate_limited("bucket_empty");
            envelope(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
        }
        Err(e) => {
            tracing::error!(client = %key, error = %e, "Rate limit store error");
            metrics::record_rate_limited("store_error");
            envelope(StatusCode::INTERNAL_SERVER_ERROR, "rate limiter unavailable")
        }
    }
}

/// Tags each request with an ID and logs one line on completion.
pub async fn access_log(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(X_REQUEST_ID, value);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        remote = %addr,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
