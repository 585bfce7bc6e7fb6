//! Least-connections load balancing strategy.
//!
//! A binary min-heap keyed by open-connection count. Each entry's backend
//! stores its own heap slot, so `release` and `remove_backend` can fix the
//! heap from an arbitrary position in O(log n) instead of rebuilding.
//! `next` mutates the heap (root increment + sift), so the whole structure
//! sits behind one mutex; no shared read mode exists for this selector.

use std::sync::{Arc, Mutex};

use crate::balancer::backend::{Backend, DETACHED};
use crate::balancer::{Balancer, BalancerError, RequestContext};

#[derive(Debug)]
struct Entry {
    connections: u64,
    backend: Arc<Backend>,
}

fn swap_entries(heap: &mut [Entry], i: usize, j: usize) {
    heap.swap(i, j);
    heap[i].backend.set_index(i);
    heap[j].backend.set_index(j);
}

/// Bubble the entry at `i` toward the root. Returns its final slot.
fn sift_up(heap: &mut [Entry], mut i: usize) -> usize {
    while i > 0 {
        let parent = (i - 1) / 2;
        if heap[i].connections >= heap[parent].connections {
            break;
        }
        swap_entries(heap, i, parent);
        i = parent;
    }
    i
}

/// Push the entry at `i` down to its ordered slot.
fn sift_down(heap: &mut [Entry], mut i: usize) {
    loop {
        let left = 2 * i + 1;
        let right = left + 1;
        let mut smallest = i;

        if left < heap.len() && heap[left].connections < heap[smallest].connections {
            smallest = left;
        }
        if right < heap.len() && heap[right].connections < heap[smallest].connections {
            smallest = right;
        }
        if smallest == i {
            break;
        }
        swap_entries(heap, i, smallest);
        i = smallest;
    }
}

/// Restore heap order after the key at `i` changed in either direction.
fn fix(heap: &mut [Entry], i: usize) {
    if sift_up(heap, i) == i {
        sift_down(heap, i);
    }
}

/// Fewest-open-connections selector.
#[derive(Debug)]
pub struct LeastConnections {
    heap: Mutex<Vec<Entry>>,
}

impl LeastConnections {
    pub fn new(backends: Vec<Arc<Backend>>) -> Self {
        let heap: Vec<Entry> = backends
            .into_iter()
            .map(|backend| Entry {
                connections: 0,
                backend,
            })
            .collect();
        // All counts start at zero, so the vector is already heap-ordered.
        for (i, entry) in heap.iter().enumerate() {
            entry.backend.set_index(i);
        }
        Self {
            heap: Mutex::new(heap),
        }
    }

    #[cfg(test)]
    fn connections_of(&self, backend: &Arc<Backend>) -> Option<u64> {
        let heap = self.heap.lock().expect("heap lock poisoned");
        let i = backend.index();
        (i < heap.len() && Arc::ptr_eq(&heap[i].backend, backend))
            .then(|| heap[i].connections)
    }
}

impl Balancer for LeastConnections {
    fn next(&self, _ctx: &RequestContext) -> Result<Arc<Backend>, BalancerError> {
        let mut heap = self.heap.lock().expect("heap lock poisoned");
        if heap.is_empty() {
            return Err(BalancerError::NoAliveBackends);
        }

        let backend = Arc::clone(&heap[0].backend);
        heap[0].connections += 1;
        sift_down(&mut heap, 0);
        Ok(backend)
    }

    fn add_backend(&self, backend: Arc<Backend>) {
        let mut heap = self.heap.lock().expect("heap lock poisoned");
        backend.set_index(heap.len());
        heap.push(Entry {
            connections: 0,
            backend,
        });
        let last = heap.len() - 1;
        sift_up(&mut heap, last);
    }

    fn remove_backend(&self, index: usize) {
        let mut heap = self.heap.lock().expect("heap lock poisoned");
        if index >= heap.len() {
            return;
        }
        let last = heap.len() - 1;
        if index != last {
            swap_entries(&mut heap, index, last);
        }
        if let Some(removed) = heap.pop() {
            removed.backend.set_index(DETACHED);
        }
        if index < heap.len() {
            fix(&mut heap, index);
        }
    }

    fn release(&self, backend: &Arc<Backend>) {
        let mut heap = self.heap.lock().expect("heap lock poisoned");
        let i = backend.index();
        // The backend may have been evicted (and the slot reused) between
        // acquisition and release; only fix entries we still own.
        if i < heap.len() && Arc::ptr_eq(&heap[i].backend, backend) {
            heap[i].connections = heap[i].connections.saturating_sub(1);
            fix(&mut heap, i);
        }
    }

    fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.heap
            .lock()
            .expect("heap lock poisoned")
            .iter()
            .map(|entry| Arc::clone(&entry.backend))
            .collect()
    }
}
