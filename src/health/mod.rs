//! Active health checking.
//!
//! The checker keeps its own registry of every backend configured at
//! startup, so a backend evicted from the pool keeps being probed and
//! rejoins once it answers again.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::balancer::backend::Backend;
use crate::balancer::Balancer;
use crate::config::HealthCheckConfig;
use crate::observability::metrics;

pub struct HealthChecker {
    /// Every backend known at startup, including evicted ones.
    registry: Vec<Arc<Backend>>,
    balancer: Arc<dyn Balancer>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthChecker {
    pub fn new(
        registry: Vec<Arc<Backend>>,
        balancer: Arc<dyn Balancer>,
        config: HealthCheckConfig,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            registry,
            balancer,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            backends = self.registry.len(),
            "Health checker starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn check_all(&self) {
        for backend in &self.registry {
            let healthy = self.probe(backend).await;
            let was_alive = backend.is_alive();

            if healthy && !was_alive {
                tracing::info!(backend = %backend.url(), "Backend recovered, rejoining pool");
                backend.set_alive(true);
                self.balancer.add_backend(backend.clone());
            } else if !healthy && was_alive {
                tracing::warn!(backend = %backend.url(), "Backend unhealthy, leaving pool");
                backend.set_alive(false);
                self.balancer.remove_backend(backend.index());
            }

            metrics::record_backend_health(backend.url().as_str(), healthy);
        }
    }

    /// One probe. A backend is healthy when it answers below 500 within
    /// the timeout; a 4xx still means the process is up and serving.
    async fn probe(&self, backend: &Arc<Backend>) -> bool {
        let uri = format!(
            "{}{}",
            backend.url().as_str().trim_end_matches('/'),
            self.config.path
        );

        let request = match Request::builder()
            .method("GET")
            .uri(&uri)
            .header("user-agent", "flowgate-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let ok = response.status().as_u16() < 500;
                if !ok {
                    tracing::warn!(backend = %backend.url(), status = %response.status(), "Health check failed: server error");
                }
                ok
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.url(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.url(), "Health check failed: timeout");
                false
            }
        }
    }
}
