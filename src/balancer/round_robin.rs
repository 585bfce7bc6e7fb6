//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::balancer::backend::{Backend, DETACHED};
use crate::balancer::{Balancer, BalancerError, RequestContext};

/// Round-robin selector: a monotonically increasing cursor over the live
/// sequence, wrapping modulo pool size.
///
/// No per-call liveness filtering: health-checker eviction keeps dead
/// backends out of the sequence.
#[derive(Debug)]
pub struct RoundRobin {
    backends: RwLock<Vec<Arc<Backend>>>,
    cursor: AtomicU64,
}

impl RoundRobin {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        for (i, backend) in backends.iter().enumerate() {
            backend.set_index(i);
        }
        Self {
            backends: RwLock::new(backends),
            cursor: AtomicU64::new(0),
        }
    }
}

impl Balancer for RoundRobin {
    fn next(&self, _ctx: &RequestContext) -> Result<Arc<Backend>, BalancerError> {
        let backends = self.backends.read().expect("pool lock poisoned");
        if backends.is_empty() {
            return Err(BalancerError::NoAliveBackends);
        }

        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        let index = (turn % backends.len() as u64) as usize;
        Ok(Arc::clone(&backends[index]))
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
        // Removal shifts every later element down one slot.
        for (i, backend) in backends.iter().enumerate().skip(index) {
            backend.set_index(i);
        }
    }

    fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().expect("pool lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::backend::backends_from_urls;

    fn make_backends(count: usize) -> Vec<Arc<Backend>> {
        let urls: Vec<String> = (0..count)
            .map(|i| format!("http://10.0.0.{}:8080", i + 1))
            .collect();
        backends_from_urls(&urls).unwrap()
    }

    #[test]
    fn test_cycles_through_every_member_before_repeating() {
        let pool = RoundRobin::new(make_backends(3));
        let ctx = RequestContext::default();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(pool.next(&ctx).unwrap().url().clone());
        }
        seen.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        seen.dedup();
        assert_eq!(seen.len(), 3, "one full cycle must visit every backend");

        // Second cycle repeats the same order.
        let first = pool.next(&ctx).unwrap();
        let again = {
            let _ = pool.next(&ctx).unwrap();
            let _ = pool.next(&ctx).unwrap();
            pool.next(&ctx).unwrap()
        };
        assert_eq!(first.url(), again.url());
    }

    #[test]
    fn test_empty_pool_errors() {
        let pool = RoundRobin::new(Vec::new());
        let result = pool.next(&RequestContext::default());
        assert!(matches!(result, Err(BalancerError::NoAliveBackends)));
    }

    #[test]
    fn test_remove_reindexes_survivors() {
        let backends = make_backends(3);
        let pool = RoundRobin::new(backends.clone());

        pool.remove_backend(0);
        assert_eq!(backends[0].index(), DETACHED);
        assert_eq!(backends[1].index(), 0);
        assert_eq!(backends[2].index(), 1);
        assert_eq!(pool.all_backends().len(), 2);
    }

    #[test]
    fn test_remove_out_of_range_is_ignored() {
        let pool = RoundRobin::new(make_backends(2));
        pool.remove_backend(7);
        assert_eq!(pool.all_backends().len(), 2);
    }

    #[test]
    fn test_add_after_remove_rejoins_rotation() {
        let backends = make_backends(2);
        let pool = RoundRobin::new(backends.clone());
        let ctx = RequestContext::default();

        pool.remove_backend(1);
        pool.add_backend(Arc::clone(&backends[1]));
        assert_eq!(backends[1].index(), 1);

        let mut urls: Vec<String> = (0..2)
            .map(|_| pool.next(&ctx).unwrap().url().to_string())
            .collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 2);
    }
}
