//! Partitioned group store contract.

use async_trait::async_trait;
use correlation_core::{EventGroup, Result};
use tracing::warn;

/// Key-partitioned map from group id to an aggregation group.
///
/// `store` must reject an existing key with the distinguishable
/// "already exists" error and `retrieve`/`remove` must reject a missing key
/// with "not found" (see [`correlation_core::Error::is_already_exists`] and
/// [`correlation_core::Error::is_not_found`]).
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Stores a new group. Fails if `key` already exists in `partition`.
    async fn store(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()>;

    /// Retrieves a copy of the stored group.
    async fn retrieve(&self, key: &str, partition: &str) -> Result<EventGroup>;

    /// Removes and returns the stored group.
    async fn remove(&self, key: &str, partition: &str) -> Result<EventGroup>;

    async fn contains(&self, key: &str, partition: &str) -> Result<bool>;

    /// Lists every key in the partition.
    async fn all_keys(&self, partition: &str) -> Result<Vec<String>>;

    /// Removes every group in the partition.
    async fn clear(&self, partition: &str) -> Result<()>;

    /// Replaces an existing group.
    ///
    /// Built from remove + store for backends without an update primitive.
    /// If the store step fails the removed copy is put back, so the previous
    /// durable state is kept.
    async fn update(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        let previous = self.remove(key, partition).await?;

        if let Err(e) = self.store(key, group, partition).await {
            if let Err(restore_err) = self.store(key, &previous, partition).await {
                warn!(
                    key = key,
                    partition = partition,
                    error = %restore_err,
                    "Failed to restore group after failed update"
                );
            }
            return Err(e);
        }

        Ok(())
    }

    /// Short backend name for logs.
    fn backend_type(&self) -> &'static str;
}
