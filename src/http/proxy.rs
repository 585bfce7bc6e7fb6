//! Forwarding pipeline.
//!
//! Idempotent requests (GET, HEAD) have their request body buffered and
//! are retried across backends: any attempt that fails marks the backend
//! dead, evicts it from the pool, and moves on to the next selection.
//! Failed upstream responses are never relayed to the client. Successful
//! response bodies stream through after a bounded marker scan. All other
//! methods get a single forwarding attempt.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{stream, StreamExt};
use http_body_util::BodyExt;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{ConnectInfo, State},
    http::{
        header,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderMap, Method, Request, StatusCode, Uri, Version,
    },
    response::Response,
};

use crate::balancer::backend::Backend;
use crate::balancer::{BalancerError, RequestContext};
use crate::http::response::envelope;
use crate::http::server::AppState;
use crate::observability::metrics;

/// Cap on the buffered request body in the retry path.
const BUFFER_LIMIT: usize = 1024 * 1024;

/// How much of a response body is inspected for the refused marker.
/// Bodies larger than this are real payloads and stream through.
const MARKER_SCAN_LIMIT: usize = 64 * 1024;

/// Marker some upstreams embed in error bodies when their own dependency
/// is down. Treated as a failed attempt even under a 2xx status.
const REFUSED_MARKER: &[u8] = b"connection refused";

/// Main proxy handler. Selects a backend and forwards the request.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let ctx = RequestContext {
        client_addr: Some(addr),
    };

    if request.method() == Method::GET || request.method() == Method::HEAD {
        forward_with_retries(&state, ctx, request).await
    } else {
        forward_once(&state, ctx, request).await
    }
}

/// Retry pipeline for idempotent requests.
async fn forward_with_retries(
    state: &AppState,
    ctx: RequestContext,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();
    let method_str = parts.method.to_string();

    let body_bytes = match to_bytes(body, BUFFER_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer request body");
            return envelope(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    for attempt in 1..=state.max_retries {
        let backend = match state.balancer.next(&ctx) {
            Ok(backend) => backend,
            Err(BalancerError::NoClientAddr) => {
                return envelope(StatusCode::INTERNAL_SERVER_ERROR, "client address unknown");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Backend selection failed");
                metrics::record_request(&method_str, 503, "none", start_time);
                return envelope(StatusCode::SERVICE_UNAVAILABLE, "no alive backends");
            }
        };

        let req = match build_upstream_request(
            &parts.method,
            parts.version,
            &parts.headers,
            &parts.uri,
            &backend,
            Body::from(body_bytes.clone()),
        ) {
            Ok(req) => req,
            Err(response) => {
                state.balancer.release(&backend);
                return response;
            }
        };

        match attempt_request(state, req).await {
            Ok(response) => {
                state.balancer.release(&backend);
                let status = response.status();
                metrics::record_request(&method_str, status.as_u16(), backend.url().as_str(), start_time);
                return response;
            }
            Err(reason) => {
                tracing::warn!(
                    backend = %backend.url(),
                    attempt,
                    reason = %reason,
                    "Attempt failed, evicting backend"
                );
                state.balancer.release(&backend);
                backend.set_alive(false);
                state.balancer.remove_backend(backend.index());
                metrics::record_backend_health(backend.url().as_str(), false);
            }
        }
    }

    metrics::record_request(&method_str, 429, "none", start_time);
    envelope(StatusCode::TOO_MANY_REQUESTS, "all attempts exhausted")
}

/// Single forwarding attempt for non-idempotent requests. The upstream
/// response streams through untouched; only transport failures are
/// converted to a local error.
async fn forward_once(state: &AppState, ctx: RequestContext, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method_str = request.method().to_string();

    let backend = match state.balancer.next(&ctx) {
        Ok(backend) => backend,
        Err(BalancerError::NoClientAddr) => {
            return envelope(StatusCode::INTERNAL_SERVER_ERROR, "client address unknown");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Backend selection failed");
            metrics::record_request(&method_str, 503, "none", start_time);
            return envelope(StatusCode::SERVICE_UNAVAILABLE, "no alive backends");
        }
    };

    let (parts, body) = request.into_parts();
    let req = match build_upstream_request(
        &parts.method,
        parts.version,
        &parts.headers,
        &parts.uri,
        &backend,
        body,
    ) {
        Ok(req) => req,
        Err(response) => {
            state.balancer.release(&backend);
            return response;
        }
    };

    let result = state.client.request(req).await;
    state.balancer.release(&backend);

    match result {
        Ok(response) => {
            let status = response.status();
            metrics::record_request(&method_str, status.as_u16(), backend.url().as_str(), start_time);
            let (upstream_parts, upstream_body) = response.into_parts();
            Response::from_parts(upstream_parts, Body::new(upstream_body))
        }
        Err(e) => {
            tracing::error!(backend = %backend.url(), error = %e, "Upstream request failed");
            metrics::record_request(&method_str, 502, backend.url().as_str(), start_time);
            envelope(StatusCode::BAD_GATEWAY, "upstream request failed")
        }
    }
}

/// One request/response exchange against a backend.
///
/// An attempt succeeds when the upstream answers below 500 and the start
/// of the body does not carry the refused-connection marker. Only the
/// first [`MARKER_SCAN_LIMIT`] bytes are inspected; response size alone
/// never fails an attempt. On failure the response is discarded so the
/// client never sees a failed attempt.
async fn attempt_request(state: &AppState, req: Request<Body>) -> Result<Response, String> {
    let response = state
        .client
        .request(req)
        .await
        .map_err(|e| format!("transport: {e}"))?;

    if response.status().as_u16() >= 500 {
        return Err(format!("upstream status {}", response.status()));
    }

    let (parts, body) = response.into_parts();
    let mut body = Body::new(body);
    let mut prefix: Vec<u8> = Vec::new();
    let mut ended = false;
    while prefix.len() < MARKER_SCAN_LIMIT {
        match body.frame().await {
            None => {
                ended = true;
                break;
            }
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    prefix.extend_from_slice(&data);
                }
            }
            Some(Err(e)) => return Err(format!("body read: {e}")),
        }
    }

    if body_contains(&prefix, REFUSED_MARKER) {
        return Err("upstream reported connection refused".to_string());
    }

    let relay = if ended {
        Body::from(prefix)
    } else {
        let head = stream::once(async move { Ok::<_, axum::Error>(Bytes::from(prefix)) });
        Body::from_stream(head.chain(body.into_data_stream()))
    };
    Ok(Response::from_parts(parts, relay))
}

/// Rewrite the request line for a backend, preserving headers and the
/// request ID set by the access log middleware.
fn build_upstream_request(
    method: &Method,
    version: Version,
    headers: &HeaderMap,
    original_uri: &Uri,
    backend: &Arc<Backend>,
    body: Body,
) -> Result<Request<Body>, Response> {
    let mut uri_parts = original_uri.clone().into_parts();
    uri_parts.scheme = Some(if backend.url().scheme() == "https" {
        Scheme::HTTPS
    } else {
        Scheme::HTTP
    });
    uri_parts.authority = Authority::from_str(backend.url().authority())
        .map(Some)
        .map_err(|e| {
            tracing::error!(backend = %backend.url(), error = %e, "Invalid backend authority");
            envelope(StatusCode::INTERNAL_SERVER_ERROR, "invalid backend address")
        })?;
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }

    let uri = Uri::from_parts(uri_parts).map_err(|e| {
        tracing::error!(backend = %backend.url(), error = %e, "URI rewrite failed");
        envelope(StatusCode::INTERNAL_SERVER_ERROR, "request rewrite failed")
    })?;

    let mut builder = Request::builder().method(method.clone()).version(version).uri(uri);
    if let Some(out) = builder.headers_mut() {
        for (k, v) in headers.iter() {
            if k != header::HOST {
                out.insert(k.clone(), v.clone());
            }
        }
    }

    builder.body(body).map_err(|e| {
        tracing::error!(error = %e, "Failed to build upstream request");
        envelope(StatusCode::INTERNAL_SERVER_ERROR, "request rewrite failed")
    })
}

fn body_contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn backend(url: &str) -> Arc<Backend> {
        Arc::new(Backend::new(Url::parse(url).unwrap()))
    }

    #[test]
    fn test_uri_rewrite_targets_backend() {
        let backend = backend("http://10.0.0.5:3000");
        let req = build_upstream_request(
            &Method::GET,
            Version::HTTP_11,
            &HeaderMap::new(),
            &"http://proxy.example/api/v1/items?page=2".parse().unwrap(),
            &backend,
            Body::empty(),
        )
        .unwrap();

        assert_eq!(req.uri().authority().unwrap().as_str(), "10.0.0.5:3000");
        assert_eq!(req.uri().scheme_str(), Some("http"));
        assert_eq!(req.uri().path_and_query().unwrap().as_str(), "/api/v1/items?page=2");
    }

    #[test]
    fn test_host_header_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "proxy.example".parse().unwrap());
        headers.insert("x-custom", "kept".parse().unwrap());

        let req = build_upstream_request(
            &Method::GET,
            Version::HTTP_11,
            &headers,
            &"/".parse().unwrap(),
            &backend("http://10.0.0.5:3000"),
            Body::empty(),
        )
        .unwrap();

        assert!(req.headers().get(header::HOST).is_none());
        assert_eq!(req.headers().get("x-custom").unwrap(), "kept");
    }

    #[test]
    fn test_refused_marker_detected() {
        assert!(body_contains(b"dial tcp: connection refused", REFUSED_MARKER));
        assert!(!body_contains(b"all good here", REFUSED_MARKER));
        assert!(!body_contains(b"", REFUSED_MARKER));
    }
}
