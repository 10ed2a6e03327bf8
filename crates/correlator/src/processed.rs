//! Bounded memory of completed group ids.

use moka::future::Cache;
use moka::policy::EvictionPolicy;

/// Recently completed groups, least recently used evicted first.
///
/// LRU admits every insert, so a just-completed id is always remembered.
#[derive(Clone)]
pub struct ProcessedGroups {
    ids: Option<Cache<String, ()>>,
}

impl ProcessedGroups {
    /// `capacity == 0` disables tracking.
    pub fn new(capacity: usize) -> Self {
        let ids = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity as u64)
                .eviction_policy(EvictionPolicy::lru())
                .build()
        });
        Self { ids }
    }

    /// Records a completed group.
    pub async fn insert(&self, group_id: &str) {
        if let Some(ids) = &self.ids {
            ids.insert(group_id.to_string(), ()).await;
        }
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.ids
            .as_ref()
            .is_some_and(|ids| ids.contains_key(group_id))
    }
}
