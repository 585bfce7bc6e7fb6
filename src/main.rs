//! Flowgate: an HTTP load balancer with a distributed rate limiter.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                  FLOWGATE                    │
//!                        │                                              │
//!   Client Request       │  ┌─────────┐   ┌───────────┐   ┌──────────┐ │
//!   ─────────────────────┼─▶│  http   │──▶│  limiter  │──▶│ balancer │ │
//!                        │  │ server  │   │ admission │   │ selector │ │
//!                        │  └─────────┘   └─────┬─────┘   └────┬─────┘ │
//!                        │                      │              │       │
//!                        │                      ▼              ▼       │
//!                        │               ┌────────────┐  ┌───────────┐ │
//!   Client Response      │               │ Redis /    │  │  backend  │◀┼── Backend
//!   ◀────────────────────┼───────────────│ memory     │  │  forward  │ │   Server
//!                        │               │ store      │  │  + retry  │ │
//!                        │               └────────────┘  └───────────┘ │
//!                        │                                              │
//!                        │  ┌────────────────────────────────────────┐  │
//!                        │  │         Cross-Cutting Concerns         │  │
//!                        │  │  config │ health checks │ observability │ │
//!                        │  │         │   lifecycle (shutdown)        │ │
//!                        │  └────────────────────────────────────────┘  │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowgate::config::{load_config, AppConfig, StoreBackend};
use flowgate::http::HttpServer;
use flowgate::lifecycle::Shutdown;
use flowgate::limiter::store::Store;

#[derive(Parser, Debug)]
#[command(name = "flowgate", version, about = "HTTP load balancer with a distributed rate limiter")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("flowgate={},tower_http=info", config.observability.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "flowgate starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        algorithm = config.balancer.algorithm.name(),
        backends = config.balancer.backends.len(),
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => flowgate::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(Store::from_config(&config.store, &config.rate_limit)?);
    if config.store.backend == StoreBackend::Redis {
        store.ping().await?;
        tracing::info!(url = %config.store.url, "Redis store reachable");
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_rx = shutdown.subscribe();
    let health_rx = shutdown.subscribe();

    shutdown.trigger_on_ctrl_c();

    let server = HttpServer::new(config, store)?;
    server.run(listener, server_rx, health_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
