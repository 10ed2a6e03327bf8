//! Mock implementations for testing.

use async_trait::async_trait;
use correlation_core::error::{RoutingErrorCode, StoreErrorCode};
use correlation_core::{Error, Event, EventGroup, Result};
use correlator::{CollectionPolicy, CorrelationListener, CorrelationNotification, CorrelationPolicy};
use group_store::GroupStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn io_failure(op: &str) -> Error {
    Error::store(StoreErrorCode::Io, format!("Mock store {} failure", op))
}

/// Store wrapper with switchable failures and per-key remove counts.
///
/// Overrides `update` with the inner store's atomic replace.
pub struct FailingStore {
    inner: Arc<dyn GroupStore>,
    fail_store: AtomicBool,
    fail_update: AtomicBool,
    fail_remove: AtomicBool,
    removes: Mutex<HashMap<String, usize>>,
    /// Next `remove` finds the group already taken by "another node"
    lose_next_remove: AtomicBool,
    /// Group written by "another node" right before our next `store`
    competing_create: Mutex<Option<EventGroup>>,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn GroupStore>) -> Self {
        Self {
            inner,
            fail_store: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            removes: Mutex::new(HashMap::new()),
            lose_next_remove: AtomicBool::new(false),
            competing_create: Mutex::new(None),
        }
    }

    pub fn set_fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Successful removes of `key`.
    pub fn remove_count(&self, key: &str) -> usize {
        self.removes.lock().get(key).copied().unwrap_or(0)
    }

    /// Simulates another node completing the group right before our remove.
    pub fn lose_next_remove(&self) {
        self.lose_next_remove.store(true, Ordering::SeqCst);
    }

    /// Simulates another node creating `group` between our lookup and insert.
    pub fn race_next_create(&self, group: EventGroup) {
        *self.competing_create.lock() = Some(group);
    }
}

#[async_trait]
impl GroupStore for FailingStore {
    async fn store(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(io_failure("store"));
        }
        let competing = self.competing_create.lock().take();
        if let Some(competing) = competing {
            self.inner.store(key, &competing, partition).await?;
        }
        self.inner.store(key, group, partition).await
    }

    async fn retrieve(&self, key: &str, partition: &str) -> Result<EventGroup> {
        self.inner.retrieve(key, partition).await
    }

    async fn remove(&self, key: &str, partition: &str) -> Result<EventGroup> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(io_failure("remove"));
        }
        if self.lose_next_remove.swap(false, Ordering::SeqCst) {
            self.inner.remove(key, partition).await?;
            return Err(Error::not_found(key, partition));
        }
        let group = self.inner.remove(key, partition).await?;
        *self.removes.lock().entry(key.to_string()).or_default() += 1;
        Ok(group)
    }

    async fn contains(&self, key: &str, partition: &str) -> Result<bool> {
        self.inner.contains(key, partition).await
    }

    async fn all_keys(&self, partition: &str) -> Result<Vec<String>> {
        self.inner.all_keys(partition).await
    }

    async fn clear(&self, partition: &str) -> Result<()> {
        self.inner.clear(partition).await
    }

    async fn update(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(io_failure("update"));
        }
        self.inner.update(key, group, partition).await
    }

    fn backend_type(&self) -> &'static str {
        "mock"
    }
}

/// Store exposing only the base operations, so `update` falls back to the
/// trait's remove + store.
pub struct BasicStore {
    inner: Arc<dyn GroupStore>,
    fail_next_store: AtomicBool,
}

impl BasicStore {
    pub fn new(inner: Arc<dyn GroupStore>) -> Self {
        Self {
            inner,
            fail_next_store: AtomicBool::new(false),
        }
    }

    /// Makes only the next `store` call fail.
    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupStore for BasicStore {
    async fn store(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(io_failure("store"));
        }
        self.inner.store(key, group, partition).await
    }

    async fn retrieve(&self, key: &str, partition: &str) -> Result<EventGroup> {
        self.inner.retrieve(key, partition).await
    }

    async fn remove(&self, key: &str, partition: &str) -> Result<EventGroup> {
        self.inner.remove(key, partition).await
    }

    async fn contains(&self, key: &str, partition: &str) -> Result<bool> {
        self.inner.contains(key, partition).await
    }

    async fn all_keys(&self, partition: &str) -> Result<Vec<String>> {
        self.inner.all_keys(partition).await
    }

    async fn clear(&self, partition: &str) -> Result<()> {
        self.inner.clear(partition).await
    }

    fn backend_type(&self) -> &'static str {
        "basic"
    }
}

/// Collection policy whose aggregation can be switched to fail.
#[derive(Default)]
pub struct ScriptedPolicy {
    inner: CollectionPolicy,
    fail_aggregate: AtomicBool,
    aggregations: AtomicUsize,
}

impl ScriptedPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_aggregate(&self, fail: bool) {
        self.fail_aggregate.store(fail, Ordering::SeqCst);
    }

    /// Successful aggregations.
    pub fn aggregations(&self) -> usize {
        self.aggregations.load(Ordering::SeqCst)
    }
}

impl CorrelationPolicy for ScriptedPolicy {
    fn create_event_group(&self, event: &Event, group_id: &str) -> EventGroup {
        self.inner.create_event_group(event, group_id)
    }

    fn should_aggregate_events(&self, group: &EventGroup) -> bool {
        self.inner.should_aggregate_events(group)
    }

    fn aggregate_events(&self, group: &EventGroup) -> Result<Event> {
        if self.fail_aggregate.load(Ordering::SeqCst) {
            return Err(Error::routing(
                RoutingErrorCode::AggregationFailed,
                "Mock aggregation failure",
            ));
        }
        let event = self.inner.aggregate_events(group)?;
        self.aggregations.fetch_add(1, Ordering::SeqCst);
        Ok(event)
    }
}

/// Listener capturing notifications and callback counts.
#[derive(Default)]
pub struct RecordingListener {
    notifications: Mutex<Vec<CorrelationNotification>>,
    before: AtomicUsize,
    after: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<CorrelationNotification> {
        self.notifications.lock().clone()
    }

    /// Count of notifications of one kind, e.g. `"group_aggregated"`.
    pub fn count(&self, kind: &str) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }

    pub fn before_count(&self) -> usize {
        self.before.load(Ordering::SeqCst)
    }

    pub fn after_count(&self) -> usize {
        self.after.load(Ordering::SeqCst)
    }
}

impl CorrelationListener for RecordingListener {
    fn on_notification(&self, notification: &CorrelationNotification) -> Result<()> {
        self.notifications.lock().push(notification.clone());
        Ok(())
    }

    fn before_processing(&self, _event: &Event) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_processing(&self, _group_id: &str, _elapsed: Duration) -> Result<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener that panics on every callback.
pub struct PanickingListener;

impl CorrelationListener for PanickingListener {
    fn on_notification(&self, _: &CorrelationNotification) -> Result<()> {
        panic!("listener bug");
    }

    fn before_processing(&self, _: &Event) -> Result<()> {
        Err(Error::internal("instrumentation offline"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use group_store::InMemoryGroupStore;

    #[tokio::test]
    async fn test_failing_store_counts_removes() {
        let store = FailingStore::new(Arc::new(InMemoryGroupStore::new()));
        store.store("k", &EventGroup::new("k", None), "p").await.unwrap();
        store.remove("k", "p").await.unwrap();
        assert!(store.remove("k", "p").await.is_err());
        assert_eq!(store.remove_count("k"), 1);
    }

    #[tokio::test]
    async fn test_failure_flags() {
        let store = FailingStore::new(Arc::new(InMemoryGroupStore::new()));
        store.set_fail_store(true);
        let err = store
            .store("k", &EventGroup::new("k", None), "p")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
