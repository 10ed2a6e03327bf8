//! Per-group lock registry.
//!
//! One async mutex per group id, created lazily. An entry is dropped as soon
//! as nobody holds or waits for it, so the registry tracks live contention
//! instead of every key ever seen.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type GroupLock = Arc<AsyncMutex<()>>;

/// Registry of per-group locks.
#[derive(Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<String, GroupLock>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to one group. Unrelated groups never block.
    pub async fn acquire(&self, group_id: &str) -> GroupLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            let lock = locks
                .entry(group_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone();
            metrics().active_locks.set(locks.len() as u64);
            lock
        };

        GroupLockGuard {
            registry: self,
            group_id: group_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drops entries nobody holds. Picks up locks left behind by cancelled
    /// acquisitions.
    pub fn prune(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        metrics().active_locks.set(locks.len() as u64);
    }

    /// Number of registered locks.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, group_id: &str) {
        let mut locks = self.locks.lock();
        // the map's own reference is the last one
        if locks
            .get(group_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(group_id);
        }
        metrics().active_locks.set(locks.len() as u64);
    }
}

/// Held lock on one group; released and pruned on drop.
pub struct GroupLockGuard<'a> {
    registry: &'a GroupLocks,
    group_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GroupLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry.release(&self.group_id);
    }
}
