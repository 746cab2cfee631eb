//! Per-key async mutual exclusion.
//!
//! Used twice: keyed on VM id so lifecycle operations on one VM run one at
//! a time, and keyed on quota pool owner so admission and insert cannot
//! interleave across requests that share a pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while the key is locked. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self
            .entries()
            .entry(key.to_string())
            .or_default()
            .clone();

        let guard = mutex.lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.entries().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut entries = self.owner.entries();
        if let Some(mutex) = entries.get(&self.key) {
            // Only the map still references it: nobody holds or waits.
            if Arc::strong_count(mutex) == 1 {
                entries.remove(&self.key);
            }
        }
    }
}
