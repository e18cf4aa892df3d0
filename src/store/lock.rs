//! Per-key exclusive locks with bounded acquisition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::{Error, Result};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Registry of async mutexes, one per key.
///
/// Holders of different keys never contend. Acquisition waits at most the
/// given timeout and then fails with [`Error::LockTimeout`]. An entry lives
/// only while some caller holds or awaits its key.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Registry,
}

/// Held lock for one key; released on drop.
pub struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        evict_idle(&self.registry, &self.key);
    }
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str, wait: Duration) -> Result<KeyGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_string()).or_default().clone()
        };

        let acquired = timeout(wait, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(KeyGuard {
                key: key.to_string(),
                guard: Some(guard),
                registry: self.locks.clone(),
            }),
            Err(_) => {
                evict_idle(&self.locks, key);
                Err(Error::LockTimeout {
                    key: key.to_string(),
                    timeout: wait,
                })
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop the entry for `key` once only the registry refers to it.
///
/// Callers clone entries under the registry lock, so a count of one means
/// nobody else can reach the mutex.
fn evict_idle(registry: &Registry, key: &str) {
    let mut locks = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        locks.remove(key);
    }
}

impl std::fmt::Debug for KeyedLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks").field("keys", &self.len()).finish()
    }
}
