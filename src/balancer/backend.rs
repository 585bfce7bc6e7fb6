//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track liveness behind the backend's own lock
//! - Track the backend's position inside whichever pool owns it
//!
//! The position index is an array offset for the round-robin and hash pools
//! and a heap slot for the least-connections pool. It is only meaningful
//! while the backend is a member of exactly one pool; every structural pool
//! mutation keeps it consistent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use url::Url;

use crate::balancer::error::BalancerError;

/// Sentinel index for a backend that is not a member of any pool.
pub const DETACHED: usize = usize::MAX;

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Base URL of the upstream (scheme + authority).
    url: Url,
    /// Liveness flag, guarded by the backend's own lock. This lock is never
    /// held while waiting on a pool lock (fixed acquisition order shared by
    /// the health checker and the retry pipeline).
    alive: RwLock<bool>,
    /// Current position inside the owning pool.
    index: AtomicUsize,
}

impl Backend {
    /// Create a new backend. Backends start alive and detached.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            alive: RwLock::new(true),
            index: AtomicUsize::new(DETACHED),
        }
    }

    /// Base URL of the upstream.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the backend is currently considered alive.
    pub fn is_alive(&self) -> bool {
        *self.alive.read().expect("alive lock poisoned")
    }

    /// Flip the liveness flag. Callers must not hold any pool lock.
    pub fn set_alive(&self, alive: bool) {
        *self.alive.write().expect("alive lock poisoned") = alive;
    }

    /// The backend's position inside its pool, or [`DETACHED`].
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Record a new pool position. Only pools call this, under their
    /// structural lock.
    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }
}

/// Parse a configured address list into backends.
pub fn backends_from_urls(urls: &[String]) -> Result<Vec<Arc<Backend>>, BalancerError> {
    urls.iter()
        .map(|raw| {
            let url = Url::parse(raw).map_err(|source| BalancerError::InvalidBackendUrl {
                url: raw.clone(),
                source,
            })?;
            Ok(Arc::new(Backend::new(url)))
        })
        .collect()
}
