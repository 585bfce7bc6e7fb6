//! Hash-based load balancing strategy.
//!
//! Pins each client to a backend by hashing the client IP with 32-bit
//! FNV-1a and indexing into the currently-alive members. Deterministic for
//! a fixed key while the alive set is unchanged; a membership or liveness
//! change may remap clients.

use std::sync::{Arc, RwLock};

use crate::balancer::backend::{Backend, DETACHED};
use crate::balancer::{Balancer, BalancerError, RequestContext};

/// 32-bit FNV-1a.
fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Client-affinity selector.
#[derive(Debug)]
pub struct HashBalancer {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl HashBalancer {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        for (i, backend) in backends.iter().enumerate() {
            backend.set_index(i);
        }
        Self {
            backends: RwLock::new(backends),
        }
    }
}

impl Balancer for HashBalancer {
    fn next(&self, ctx: &RequestContext) -> Result<Arc<Backend>, BalancerError> {
        let client_addr = ctx.client_addr.ok_or(BalancerError::NoClientAddr)?;
        let hash = fnv1a_32(client_addr.ip().to_string().as_bytes());

        // Filter and index under one read-lock acquisition so a concurrent
        // membership change cannot yield an out-of-range index.
        let backends = self.backends.read().expect("pool lock poisoned");
        let alive: Vec<&Arc<Backend>> = backends.iter().filter(|b| b.is_alive()).collect();
        if alive.is_empty() {
            return Err(BalancerError::NoAliveBackends);
        }

        let index = hash as usize % alive.len();
        Ok(Arc::clone(alive[index]))
    }

    fn add_backend(&self, backend: Arc<Backend>) {
        let mut backends = self.backends.write().expect("pool lock poisoned");
        backend.set_index(backends.len());
        backends.push(backend);
    }

    fn remove_backend(&self, index: usize) {
        let mut backends = self.backends.write().expect("pool lock poisoned");
        if index >= backends.len() {
            return;
        }
        let removed = backends.remove(index);
        removed.set_index(DETACHED);
        for (i, backend) in backends.iter().enumerate().skip(index) {
            backend.set_index(i);
        }
    }

    fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().expect("pool lock poisoned").clone()
    }
}
