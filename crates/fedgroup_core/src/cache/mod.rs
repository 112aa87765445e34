//! Process-local group existence memoization.
//!
//! # Responsibility
//! - Remember group ids known to exist so repeated existence checks skip
//!   storage.
//!
//! # Invariants
//! - Presence means "known to exist"; absence means "unknown", never "absent".
//! - Entries are dropped only via `forget` (or capacity eviction in the
//!   bounded variant), so a hit can outlive a deletion performed through
//!   another store instance.

use log::trace;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

/// Memoization capability injected into the group store.
pub trait ExistenceCache: Send + Sync {
    fn has(&self, gid: &str) -> bool;
    fn remember(&self, gid: &str);
    fn forget(&self, gid: &str);
}

/// Unbounded cache living as long as the owning store.
#[derive(Debug, Default)]
pub struct MemoryExistenceCache {
    entries: Mutex<HashSet<String>>,
}

impl MemoryExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl ExistenceCache for MemoryExistenceCache {
    fn has(&self, gid: &str) -> bool {
        lock(&self.entries).contains(gid)
    }

    fn remember(&self, gid: &str) {
        if lock(&self.entries).insert(gid.to_string()) {
            trace!("event=cache_remember module=cache gid={gid}");
        }
    }

    fn forget(&self, gid: &str) {
        if lock(&self.entries).remove(gid) {
            trace!("event=cache_forget module=cache gid={gid}");
        }
    }
}

/// LRU-bounded cache for deployments with many distinct groups.
pub struct BoundedExistenceCache {
    entries: Mutex<LruCache<String, ()>>,
}

impl BoundedExistenceCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        lock(&self.entries).cap()
    }
}

impl ExistenceCache for BoundedExistenceCache {
    fn has(&self, gid: &str) -> bool {
        // `get` refreshes recency; `contains` would not.
        lock(&self.entries).get(gid).is_some()
    }

    fn remember(&self, gid: &str) {
        let mut entries = lock(&self.entries);
        if let Some((evicted, ())) = entries.push(gid.to_string(), ()) {
            if evicted != gid {
                trace!("event=cache_evict module=cache gid={evicted}");
            }
        }
    }

    fn forget(&self, gid: &str) {
        lock(&self.entries).pop(gid);
    }
}

// A poisoned lock only means another thread panicked mid-update of a set of
// strings; the data is still a valid memo.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
