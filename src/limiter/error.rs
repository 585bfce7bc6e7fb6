//! Typed errors for the rate-limit subsystem.

use thiserror::Error;

/// Errors produced by the limiter and the client record store.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("user not found")]
    UserNotFound,

    #[error("user already exists")]
    UserAlreadyExists,

    /// The optimistic transaction kept losing to concurrent writers.
    #[error("rate-limit transaction conflicted after retries")]
    TxConflict,

    /// A stored record field failed to parse.
    #[error("malformed rate-limit record field: {0}")]
    MalformedRecord(String),

    #[error("store error: {0}")]
    Store(#[from] deadpool_redis::redis::RedisError),

    #[error("store pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("store pool setup error: {0}")]
    PoolSetup(#[from] deadpool_redis::CreatePoolError),
}
