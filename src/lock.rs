//! Per-key mutual exclusion

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of async mutexes created on demand and reclaimed once idle.
///
/// Holders of different keys never wait on each other. Waiters for the
/// same key are served in FIFO order.
pub struct KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create an empty lock table
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: K) -> KeyGuard<K> {
        let mutex = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key; released on drop
pub struct KeyGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    key: K,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// The locked key
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Release first so the guard's reference no longer counts
        self.guard.take();
        // Only the table's reference left: nobody holds or waits on this key
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
