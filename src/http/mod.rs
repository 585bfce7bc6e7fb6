//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup)
//!     → middleware.rs (request ID, access log, rate limit admission)
//!     → [balancer picks backend]
//!     → proxy.rs (rewrite, forward, retry on failure)
//!     → response.rs (local error envelopes)
//!     → Send to client
//! ```

pub mod middleware;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use server::HttpServer;
