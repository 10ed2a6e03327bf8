//! Results handed to callers waiting on a correlation group.
//!
//! Publishing and registering a waiter both happen under the group's lock,
//! so a waiter either finds the result already kept or is registered before
//! the result is published.

use correlation_core::Event;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use telemetry::metrics;
use tokio::sync::oneshot;

pub(crate) struct Responses {
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Event>>>>,
    /// Results nobody was waiting for yet
    ready: Option<Cache<String, Event>>,
}

impl Responses {
    /// `capacity == 0` keeps no unclaimed results.
    pub(crate) fn new(capacity: usize) -> Self {
        let ready = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity as u64)
                .eviction_policy(EvictionPolicy::lru())
                .build()
        });
        Self {
            waiters: Mutex::new(HashMap::new()),
            ready,
        }
    }

    /// Hands `result` to every waiter of the group. When nobody took it and
    /// `keep` is set, it is kept for the next `take`.
    pub(crate) async fn publish(&self, group_id: &str, result: &Event, keep: bool) {
        let waiters = self.waiters.lock().remove(group_id).unwrap_or_default();

        let mut delivered = false;
        for waiter in waiters {
            metrics().response_waiters.dec();
            delivered |= waiter.send(result.clone()).is_ok();
        }

        if !delivered && keep {
            if let Some(ready) = &self.ready {
                ready.insert(group_id.to_string(), result.clone()).await;
            }
        }
    }

    /// Removes and returns a kept result.
    pub(crate) async fn take(&self, group_id: &str) -> Option<Event> {
        match &self.ready {
            Some(ready) => ready.remove(group_id).await,
            None => None,
        }
    }

    pub(crate) fn wait(&self, group_id: &str) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .push(tx);
        metrics().response_waiters.inc();
        rx
    }

    /// Drops registrations whose caller stopped waiting.
    pub(crate) fn forget_closed(&self, group_id: &str) {
        let mut waiters = self.waiters.lock();
        let Some(pending) = waiters.get_mut(group_id) else {
            return;
        };

        let before = pending.len();
        pending.retain(|w| !w.is_closed());
        for _ in pending.len()..before {
            metrics().response_waiters.dec();
        }
        if pending.is_empty() {
            waiters.remove(group_id);
        }
    }

    /// Callers currently registered.
    pub(crate) fn waiting(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }
}
