//! In-memory partitioned group store.

use async_trait::async_trait;
use correlation_core::{Error, EventGroup, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::store::GroupStore;

type Partition = HashMap<String, EventGroup>;

/// Purely in-memory store. Groups are cloned in and out so callers never
/// share a mutable group with the store.
#[derive(Debug, Default)]
pub struct InMemoryGroupStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl InMemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of groups in a partition.
    pub fn len(&self, partition: &str) -> usize {
        self.partitions
            .read()
            .get(partition)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, partition: &str) -> bool {
        self.len(partition) == 0
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn store(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        let mut partitions = self.partitions.write();
        let groups = partitions.entry(partition.to_string()).or_default();

        if groups.contains_key(key) {
            return Err(Error::already_exists(key, partition));
        }

        groups.insert(key.to_string(), group.clone());
        Ok(())
    }

    async fn retrieve(&self, key: &str, partition: &str) -> Result<EventGroup> {
        self.partitions
            .read()
            .get(partition)
            .and_then(|groups| groups.get(key))
            .cloned()
            .ok_or_else(|| Error::not_found(key, partition))
    }

    async fn remove(&self, key: &str, partition: &str) -> Result<EventGroup> {
        self.partitions
            .write()
            .get_mut(partition)
            .and_then(|groups| groups.remove(key))
            .ok_or_else(|| Error::not_found(key, partition))
    }

    async fn contains(&self, key: &str, partition: &str) -> Result<bool> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .is_some_and(|groups| groups.contains_key(key)))
    }

    async fn all_keys(&self, partition: &str) -> Result<Vec<String>> {
        Ok(self
            .partitions
            .read()
            .get(partition)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, partition: &str) -> Result<()> {
        self.partitions.write().remove(partition);
        Ok(())
    }

    async fn update(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        let mut partitions = self.partitions.write();
        let slot = partitions
            .get_mut(partition)
            .and_then(|groups| groups.get_mut(key))
            .ok_or_else(|| Error::not_found(key, partition))?;

        *slot = group.clone();
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
