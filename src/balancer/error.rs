//! Typed errors for the balancing subsystem.

use thiserror::Error;

/// Errors produced by backend selection and pool construction.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Every backend in the pool is dead or the pool is empty.
    #[error("no alive backends")]
    NoAliveBackends,

    /// The request carries no client address to derive a routing key from.
    #[error("empty client IP and port")]
    NoClientAddr,

    /// Configuration named an algorithm this build does not know.
    #[error("unknown balancing algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A configured backend address failed to parse as a URL.
    #[error("error at parsing backend URL {url}: {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
