//! Per-URL single-flight locks.
//!
//! Concurrent misses for one URL queue behind a single fetch; the waiters
//! re-check the cache once the lock is theirs. Locks for different URLs are
//! independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map of URL to its fetch lock.
///
/// Entries hold weak references, so a lock lives exactly as long as some
/// caller holds or waits on it.
#[derive(Debug, Default)]
pub struct InflightLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl InflightLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(key);
        lock.lock_owned().await
    }

    /// Number of keys with a live lock.
    #[cfg(test)]
    fn active(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.values().filter(|weak| weak.strong_count() > 0).count(),
            Err(poisoned) => poisoned.into_inner().values().filter(|weak| weak.strong_count() > 0).count(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }
}
