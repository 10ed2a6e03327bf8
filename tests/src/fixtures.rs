//! Test fixtures and event generators.

use chrono::{Duration, Utc};
use correlation_core::{Event, EventGroup};
use correlator::{CollectionPolicy, CorrelatorConfig, EventCorrelator};
use group_store::{GroupStore, InMemoryGroupStore};
use std::sync::Arc;

/// Event `seq` of a correlation group of `size` events.
pub fn member(key: &str, size: usize, seq: u32) -> Event {
    Event::new(serde_json::json!({ "key": key, "seq": seq }))
        .with_correlation_id(key)
        .with_group_size(size)
        .with_sequence(seq)
        .with_source("test")
}

/// All `size` events of one group.
pub fn members(key: &str, size: usize) -> Vec<Event> {
    (1..=size as u32).map(|seq| member(key, size, seq)).collect()
}

/// Group created `age` ago holding `events` of `size` expected members.
pub fn aged_group(key: &str, size: usize, events: usize, age: Duration) -> EventGroup {
    let mut group = EventGroup::created_at(key, Some(size), Utc::now() - age);
    for seq in 1..=events as u32 {
        group.add_event(member(key, size, seq));
    }
    group
}

/// Fresh in-memory store.
pub fn memory_store() -> Arc<InMemoryGroupStore> {
    Arc::new(InMemoryGroupStore::new())
}

/// Collection correlator over `store`.
pub fn correlator(
    store: Arc<dyn GroupStore>,
    config: CorrelatorConfig,
) -> EventCorrelator<CollectionPolicy> {
    EventCorrelator::new(CollectionPolicy::new(), store, config)
        .expect("test config must be valid")
}
