//! Event type definitions for the correlator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ids that mean "no correlation id".
pub const NO_CORRELATION_IDS: &[&str] = &["", "-1", "no-id"];

/// An in-flight event flowing through the correlator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event ID
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Business correlation id shared by related events
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Expected number of events in the correlation group
    #[serde(default)]
    pub group_size: Option<usize>,
    /// Position of this event within its correlation group
    #[serde(default)]
    pub sequence: Option<u32>,
    /// Originating source (endpoint, connector, ...)
    #[serde(default)]
    pub source: Option<String>,
    /// Event timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates a new event carrying the given payload.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: None,
            group_size: None,
            sequence: None,
            source: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_group_size(mut self, size: usize) -> Self {
        self.group_size = Some(size);
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns the correlation id if it is usable as a group key.
    pub fn usable_correlation_id(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .filter(|id| !NO_CORRELATION_IDS.contains(id))
    }
}
