//! First-occurrence gate for log events that recur on every call.
//!
//! An unresolvable call site or an identity the backend keeps rejecting would
//! otherwise emit the same warn line per call. Callers log at warn when
//! [`LogOnce::first`] says so and at debug otherwise.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashSet;

pub struct LogOnce<K: Eq + Hash> {
    seen: DashSet<K>,
    len: AtomicUsize,
}

impl<K: Eq + Hash> Default for LogOnce<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> LogOnce<K> {
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// `true` the first time `key` is seen, `false` until it is forgotten.
    pub fn first(&self, key: K) -> bool {
        let inserted = self.seen.insert(key);
        if inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Forget `key` so its next occurrence counts as first again.
    pub fn forget(&self, key: &K) -> bool {
        let removed = self.seen.remove(key).is_some();
        if removed {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Constant time; safe to check on every call.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
