//! Aggregation group accumulating events that share a correlation key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Event;

/// Events sharing one correlation key, pending a "ready" decision.
///
/// `created_at` is fixed when the group is constructed and survives
/// serialization, so expiry is measured from the first event even after a
/// restart. Events only ever grow until the group is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGroup {
    group_id: String,
    events: Vec<Event>,
    created_at: DateTime<Utc>,
    expected_size: Option<usize>,
}

impl EventGroup {
    /// Creates an empty group.
    pub fn new(group_id: impl Into<String>, expected_size: Option<usize>) -> Self {
        Self::created_at(group_id, expected_size, Utc::now())
    }

    /// Creates an empty group with an explicit creation time.
    pub fn created_at(
        group_id: impl Into<String>,
        expected_size: Option<usize>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            events: Vec::new(),
            created_at,
            expected_size,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Appends every event of `other`, keeping this group's identity.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Expected size hint, `None` when unknown.
    pub fn expected_size(&self) -> Option<usize> {
        self.expected_size
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Whether the group is older than `timeout` at `now`.
    pub fn is_expired(&self, timeout: std::time::Duration, now: DateTime<Utc>) -> bool {
        match Duration::from_std(timeout) {
            Ok(timeout) => self.age(now) > timeout,
            Err(_) => false,
        }
    }
}
