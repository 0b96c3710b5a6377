//! Exclusion Set
//!
//! Bounded record of identities known to be non-persistable.
//!
//! ## Concurrency
//! A single `parking_lot::Mutex` around an LRU map. Every operation is O(1)
//! and never touches the backend, so the lock is held only briefly and does
//! not serialize unrelated shard work.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::routing::Identity;

/// Fixed-capacity set with least-recently-inserted eviction
pub struct ExclusionSet {
    entries: Mutex<LruCache<Identity, ()>>,
}

impl ExclusionSet {
    /// Create a set holding at most `capacity` identities (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Mark an identity as do-not-cache, evicting the oldest entry when full
    pub fn insert(&self, id: Identity) {
        self.entries.lock().put(id, ());
    }

    /// Check membership without refreshing recency
    pub fn contains(&self, id: Identity) -> bool {
        self.entries.lock().contains(&id)
    }

    /// Forget an identity; returns whether it was present
    pub fn remove(&self, id: Identity) -> bool {
        self.entries.lock().pop(&id).is_some()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}
