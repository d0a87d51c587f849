//! Bounded in-memory duplicate catcher for event ids.
//!
//! Relays overlap, and watermark resumption deliberately re-requests the
//! boundary second, so the same event id routinely arrives more than once.
//! This cache catches those repeats before dispatch. It is not persisted;
//! across restarts the ledger watermark does the job instead.
//!
//! # Key Design
//!
//! - Keys: hex event ids as received
//! - `HashSet` for membership, `VecDeque` for insertion order
//! - Oldest id evicted first once `capacity` is reached

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

/// Default number of ids remembered.
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

struct Inner {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

/// Thread-safe: can be shared across tasks via `Arc<SeenEventCache>`.
pub struct SeenEventCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl SeenEventCache {
    /// Create a cache holding at most `capacity` ids (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                ids: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Check if an event id has been seen.
    pub fn seen(&self, event_id: &str) -> bool {
        self.inner.lock().ids.contains(event_id)
    }

    /// Mark an event id as seen.
    ///
    /// Returns true if this is the first time the id was marked. Check and
    /// insert happen under one lock, so concurrent callers racing on the same
    /// id get exactly one `true`.
    pub fn mark_seen(&self, event_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.ids.contains(event_id) {
            return false;
        }

        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.ids.remove(&oldest);
                }
                None => break,
            }
        }

        inner.ids.insert(event_id.to_string());
        inner.order.push_back(event_id.to_string());
        metrics::gauge!("seen_cache_size").set(inner.order.len() as f64);
        true
    }

    /// Number of ids currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SeenEventCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY)
    }
}
