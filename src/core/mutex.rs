//! Mutex keys and the process-local keyed lock table
//!
//! A [`MutexKey`] names the logical job a workload belongs to. At most one
//! cluster unit may run per key. The [`KeyedLockTable`] serializes this
//! instance's concurrent items that share a key; cross-instance races are
//! settled by the registry's atomic claim.

use std::{collections::BTreeMap, fmt, sync::Arc};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutexKey(String);

impl MutexKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key from the first configured label present on the request.
    ///
    /// Label keys are checked in configuration order so the same request always
    /// yields the same key. Empty label values are ignored.
    pub fn derive(labels: &BTreeMap<String, String>, label_keys: &[String]) -> Option<Self> {
        label_keys
            .iter()
            .find_map(|key| labels.get(key).filter(|value| !value.trim().is_empty()))
            .map(|value| Self(value.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concurrency-safe map from key to async lock.
///
/// Entries are created on first use and dropped once the last guard or waiter
/// for the key is gone, so the table only holds keys currently in contention.
#[derive(Debug, Default)]
pub struct KeyedLockTable {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`. The lock is held until the
    /// returned guard is dropped.
    pub async fn acquire(&self, key: &MutexKey) -> KeyedLockGuard {
        let lock = self
            .locks
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        trace!(mutex_key = %key, "Acquired keyed lock");

        KeyedLockGuard {
            key: key.clone(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live holder or waiter
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Scoped ownership of one key in a [`KeyedLockTable`].
pub struct KeyedLockGuard {
    key: MutexKey,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLockGuard {
    pub fn key(&self) -> &MutexKey {
        &self.key
    }
}

impl fmt::Debug for KeyedLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the table and waiters
        drop(self.guard.take());
        self.locks
            .remove_if(self.key.as_str(), |_, lock| Arc::strong_count(lock) == 1);
        trace!(mutex_key = %self.key, "Released keyed lock");
    }
}
