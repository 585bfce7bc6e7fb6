//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_requests_total` (counter): requests by method, status, backend
//! - `balancer_request_duration_seconds` (histogram): latency distribution
//! - `balancer_rate_limited_total` (counter): requests denied admission
//! - `balancer_backend_health` (gauge): 1=alive, 0=dead
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for method, backend, status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to start metrics endpoint"),
    }
}

/// Record one completed request.
pub fn record_request(method: &str, status: u16, backend: &str, start_time: Instant) {
    counter!(
        "balancer_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string(),
    )
    .increment(1);

    histogram!(
        "balancer_request_duration_seconds",
        "method" => method.to_string(),
    )
    .record(start_time.elapsed().as_secs_f64());
}

/// Record a request refused by the rate limiter.
pub fn record_rate_limited(reason: &'static str) {
    counter!("balancer_rate_limited_total", "reason" => reason).increment(1);
}

/// Record the current health state of a backend.
pub fn record_backend_health(backend: &str, alive: bool) {
    gauge!("balancer_backend_health", "backend" => backend.to_string())
        .set(if alive { 1.0 } else { 0.0 });
}
