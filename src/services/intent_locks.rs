//! In-process mutual exclusion keyed by resource name.
//!
//! The coordinator takes `intent:{id}` before touching an intent and `subject:{id}`
//! while opening a checkout for a campaign. Cross-process safety comes from the
//! storage compare-and-swap; this only keeps one instance from racing itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

type LockTable = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<Mutex<LockTable>>,
}

pub struct KeyedLockGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<LockTable>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, resource: &str) -> KeyedLockGuard {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            table
                .entry(resource.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = mutex.lock_owned().await;
        debug!(resource, "Acquired lock");
        KeyedLockGuard {
            key: resource.to_string(),
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    pub async fn acquire_intent(&self, id: Uuid) -> KeyedLockGuard {
        self.acquire(&format!("intent:{}", id)).await
    }

    pub async fn acquire_subject(&self, subject_id: &str) -> KeyedLockGuard {
        self.acquire(&format!("subject:{}", subject_id)).await
    }

    /// Number of resources with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Entries are cloned only while the table lock is held, so a count of one
        // means nobody is waiting on this resource.
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        if table
            .get(&self.key)
            .map(|m| Arc::strong_count(m) == 1)
            .unwrap_or(false)
        {
            table.remove(&self.key);
        }
    }
}
