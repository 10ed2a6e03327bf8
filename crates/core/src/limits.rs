//! Default limits and intervals for the event correlator.

use std::time::Duration;

// === Group Bookkeeping ===

/// Number of completed group ids remembered to reject late events.
pub const MAX_PROCESSED_GROUPS: usize = 50_000;

/// Attempts to resolve a duplicate-create race by merging into the stored group.
pub const MAX_MERGE_ATTEMPTS: u32 = 3;

/// Completed results kept for callers that start waiting after completion.
pub const MAX_READY_RESPONSES: usize = 1_000;

/// Suffix appended to the partition prefix.
pub const EVENT_GROUPS_SUFFIX: &str = "eventGroups";

// === Expiry Sweep ===

/// Default sweep polling interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Default group timeout. Zero disables time-based expiry.
pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::ZERO;
