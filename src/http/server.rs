//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with proxy and client admin handlers
//! - Wire up middleware (rate limit, access log, timeout, tracing)
//! - Bind server to listener
//! - Spawn the health checker
//! - Forward requests to upstream backends

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, middleware, routing::any, Router};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::balancer::{self, Balancer, BalancerError};
use crate::config::AppConfig;
use crate::health::HealthChecker;
use crate::http::middleware::{
    access_log, concurrency_limit, rate_limit_middleware, RateLimiterHandle,
};
use crate::http::proxy::proxy_handler;
use crate::limiter::controller;
use crate::limiter::store::Store;

/// Application state injected into the proxy handlers.
#[derive(Clone)]
pub struct AppState {
    pub balancer: Arc<dyn Balancer>,
    pub client: Client<HttpConnector, Body>,
    pub max_retries: u32,
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
    balancer: Arc<dyn Balancer>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: AppConfig, store: Arc<Store>) -> Result<Self, BalancerError> {
        let balancer = balancer::build(config.balancer.algorithm, &config.balancer.backends)?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            balancer: balancer.clone(),
            client,
            max_retries: config.balancer.max_retries,
        };
        let limiter = RateLimiterHandle {
            store,
            enabled: config.rate_limit.enabled,
        };

        let router = Self::build_router(&config, state, limiter);
        Ok(Self {
            router,
            config,
            balancer,
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The admin routes sit outside the rate limit layer so an exhausted
    /// client can still be inspected and reset.
    fn build_router(config: &AppConfig, state: AppState, limiter: RateLimiterHandle) -> Router {
        let proxy = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .layer(middleware::from_fn_with_state(
                limiter.clone(),
                rate_limit_middleware,
            ))
            .with_state(state);

        let connection_limit = Arc::new(Semaphore::new(config.listener.max_connections));

        controller::router(limiter.store)
            .merge(proxy)
            .layer(middleware::from_fn(access_log))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(
                connection_limit,
                concurrency_limit,
            ))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
        health_shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            algorithm = self.config.balancer.algorithm.name(),
            backends = self.config.balancer.backends.len(),
            "HTTP server starting"
        );

        if self.config.health_check.enabled {
            let checker = HealthChecker::new(
                self.balancer.all_backends(),
                self.balancer.clone(),
                self.config.health_check.clone(),
            );
            tokio::spawn(async move {
                checker.run(health_shutdown).await;
            });
        }

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        let mut shutdown = shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
