//! Flowgate: an HTTP load balancer with a distributed rate limiter.

pub mod balancer;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod limiter;
pub mod observability;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
