//! Distributed token-bucket rate limiting.
//!
//! # Data Flow
//! ```text
//! Inbound request → http/middleware.rs (rate-limit gate)
//!     → Store::allow(client_ip)
//!         - redis.rs  (WATCH/MULTI/EXEC optimistic transaction)
//!         - store.rs  (in-process map, single-instance deployments)
//!     → allowed: request continues down the pipeline
//!     → denied: 429 with JSON envelope
//!
//! /clients → controller.rs (CRUD over the same records)
//! ```
//!
//! # Design Decisions
//! - Records live in the store, not process memory: any number of balancer
//!   instances can share one limit per client
//! - Concurrency correctness is the store transaction's job, not a mutex's
//! - Refill is whole-second floored; denial persists nothing

pub mod bucket;
pub mod controller;
pub mod error;
pub mod redis;
pub mod store;

use serde::{Deserialize, Serialize};

pub use bucket::{unix_now, TokenBucket};
pub use error::LimiterError;
pub use redis::RedisStore;
pub use store::{MemoryStore, Store};

/// A client's rate-limit record as exposed by the CRUD API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_ip: String,
    #[serde(flatten)]
    pub bucket: TokenBucket,
}

/// Store key for a client's bucket.
pub(crate) fn record_key(client_ip: &str) -> String {
    format!("user:{client_ip}:tokens")
}
