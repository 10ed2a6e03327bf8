//! Partition naming for group stores.

use correlation_core::limits::EVENT_GROUPS_SUFFIX;

/// Returns the partition holding a correlator's groups: `"<prefix>.eventGroups"`.
pub fn partition_name(prefix: &str) -> String {
    format!("{}.{}", prefix, EVENT_GROUPS_SUFFIX)
}
