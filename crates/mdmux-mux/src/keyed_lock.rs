//! Keyed async lock pool.
//!
//! One mutual-exclusion region per key, created lazily. An entry is removed
//! on release only when no other task holds or waits on it: waiters clone
//! the entry's `Arc` under the map shard lock, and removal checks the strong
//! count under the same shard lock.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = DashMap<K, Arc<Mutex<()>>>;

/// Pool of per-key async mutexes.
pub struct KeyedLocks<K> {
    locks: Arc<LockMap<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquire the region for `key`, waiting behind current holders.
    ///
    /// The guard owns its place in the pool, so it can be moved into a
    /// spawned task that finishes work started under the lock.
    pub async fn lock(&self, key: &K) -> KeyedGuard<K> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self.locks.clone(),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live entry (held or awaited).
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Held region for one key. Released on drop.
pub struct KeyedGuard<K>
where
    K: Eq + Hash + Clone,
{
    locks: Arc<LockMap<K>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Release our clone of the Arc before checking whether anyone else
        // still references the entry.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
