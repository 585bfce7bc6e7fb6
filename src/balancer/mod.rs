//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request → http/proxy.rs
//!     → Balancer::next (selected algorithm):
//!         - round_robin.rs (atomic cursor over the live sequence)
//!         - hash.rs        (FNV-1a over the client IP, alive members only)
//!         - least_connections.rs (index-tracking min-heap on open conns)
//!     → proxy forward; on failure: Backend::set_alive(false)
//!       + Balancer::remove_backend, then retry
//! ```
//!
//! # Design Decisions
//! - One capability trait, three concrete selectors chosen by configuration
//! - Pool membership is the single source of truth for selection eligibility
//! - The health checker and the retry pipeline mutate membership only via
//!   `add_backend`/`remove_backend`, never the collections directly

pub mod backend;
pub mod error;
pub mod hash;
pub mod least_connections;
pub mod round_robin;

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use backend::{backends_from_urls, Backend, DETACHED};
pub use error::BalancerError;
pub use hash::HashBalancer;
pub use least_connections::LeastConnections;
pub use round_robin::RoundRobin;

/// Per-request inputs a selector may consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    /// Remote peer address of the inbound request.
    pub client_addr: Option<SocketAddr>,
}

/// Capability trait shared by the three selection algorithms.
pub trait Balancer: Send + Sync {
    /// Select a backend for the given request.
    fn next(&self, ctx: &RequestContext) -> Result<Arc<Backend>, BalancerError>;

    /// Insert a backend into the pool.
    fn add_backend(&self, backend: Arc<Backend>);

    /// Remove the backend at the given pool position. Out-of-range positions
    /// are ignored; the health checker repairs membership on its next tick.
    fn remove_backend(&self, index: usize);

    /// Release a per-request resource acquired by `next`. Only the
    /// least-connections selector tracks one.
    fn release(&self, _backend: &Arc<Backend>) {}

    /// Snapshot of the current pool membership.
    fn all_backends(&self) -> Vec<Arc<Backend>>;
}

/// Balancing algorithm selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    Hash,
    RoundRobin,
    LeastConnections,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::RoundRobin => "round-robin",
            Self::LeastConnections => "least-connections",
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = BalancerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "hash" => Ok(Self::Hash),
            "round-robin" => Ok(Self::RoundRobin),
            "least-connections" => Ok(Self::LeastConnections),
            _ => Err(BalancerError::UnknownAlgorithm(value)),
        }
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.name().to_string()
    }
}

/// Build the configured selector over the configured backend list.
pub fn build(algorithm: Algorithm, urls: &[String]) -> Result<Arc<dyn Balancer>, BalancerError> {
    let backends = backends_from_urls(urls)?;
    Ok(match algorithm {
        Algorithm::Hash => Arc::new(HashBalancer::new(backends)),
        Algorithm::RoundRobin => Arc::new(RoundRobin::new(backends)),
        Algorithm::LeastConnections => Arc::new(LeastConnections::new(backends)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parses_known_names() {
        assert_eq!(
            Algorithm::try_from("hash".to_string()).unwrap(),
            Algorithm::Hash
        );
        assert_eq!(
            Algorithm::try_from("round-robin".to_string()).unwrap(),
            Algorithm::RoundRobin
        );
        assert_eq!(
            Algorithm::try_from("least-connections".to_string()).unwrap(),
            Algorithm::LeastConnections
        );
    }

    #[test]
    fn test_algorithm_rejects_unknown_name() {
        let err = Algorithm::try_from("fastest".to_string()).unwrap_err();
        assert!(matches!(err, BalancerError::UnknownAlgorithm(name) if name == "fastest"));
    }

    #[test]
    fn test_build_each_algorithm() {
        let urls = vec!["http://10.0.0.1:8080".to_string()];
        for algorithm in [
            Algorithm::Hash,
            Algorithm::RoundRobin,
            Algorithm::LeastConnections,
        ] {
            let balancer = build(algorithm, &urls).unwrap();
            assert_eq!(balancer.all_backends().len(), 1);
        }
    }

    #[test]
    fn test_build_propagates_bad_url() {
        let result = build(Algorithm::RoundRobin, &["::".to_string()]);
        assert!(result.is_err());
    }
}
