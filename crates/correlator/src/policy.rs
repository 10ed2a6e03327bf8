//! Correlation policies: the business rules the correlator delegates to.

use chrono::{DateTime, Utc};
use correlation_core::error::RoutingErrorCode;
use correlation_core::{Error, Event, EventGroup, Result};
use std::sync::Arc;
use std::time::Duration;

/// Decides how events are grouped, when a group is ready and how it is
/// combined into one result event.
pub trait CorrelationPolicy: Send + Sync {
    /// Creates an empty group for a correlation key seen for the first time.
    fn create_event_group(&self, event: &Event, group_id: &str) -> EventGroup;

    /// Whether the group is complete and should be aggregated now.
    fn should_aggregate_events(&self, group: &EventGroup) -> bool;

    /// Combines the group's events into one result event.
    fn aggregate_events(&self, group: &EventGroup) -> Result<Event>;

    /// Correlation key for an event; `None` when it cannot be resolved.
    fn correlation_key(&self, event: &Event) -> Option<String> {
        event.usable_correlation_id().map(str::to_string)
    }

    /// Whether the group should be expired at `now`. `timeout` is the
    /// configured group timeout, `None` when it is zero; the default never
    /// expires without one.
    fn is_group_expired(
        &self,
        group: &EventGroup,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        timeout.is_some_and(|timeout| group.is_expired(timeout, now))
    }
}

impl<P: CorrelationPolicy + ?Sized> CorrelationPolicy for Arc<P> {
    fn create_event_group(&self, event: &Event, group_id: &str) -> EventGroup {
        (**self).create_event_group(event, group_id)
    }

    fn should_aggregate_events(&self, group: &EventGroup) -> bool {
        (**self).should_aggregate_events(group)
    }

    fn aggregate_events(&self, group: &EventGroup) -> Result<Event> {
        (**self).aggregate_events(group)
    }

    fn correlation_key(&self, event: &Event) -> Option<String> {
        (**self).correlation_key(event)
    }

    fn is_group_expired(
        &self,
        group: &EventGroup,
        timeout: Option<Duration>,
        now: DateTime<Utc>,
    ) -> bool {
        (**self).is_group_expired(group, timeout, now)
    }
}

/// Where the correlation key comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorrelationKeyStrategy {
    /// The event's correlation id
    #[default]
    CorrelationId,
    /// A top-level field of the JSON payload
    PayloadField(String),
}

impl CorrelationKeyStrategy {
    pub fn extract(&self, event: &Event) -> Option<String> {
        match self {
            Self::CorrelationId => event.usable_correlation_id().map(str::to_string),
            Self::PayloadField(field) => match event.payload.get(field)? {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            },
        }
    }
}

/// Collects a fixed-size group announced by its events' `group_size` hint.
///
/// The aggregate's payload is the array of member payloads, ordered by
/// `sequence` when events carry one.
#[derive(Debug, Clone, Default)]
pub struct CollectionPolicy {
    key_strategy: CorrelationKeyStrategy,
}

impl CollectionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_strategy(mut self, strategy: CorrelationKeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }
}

impl CorrelationPolicy for CollectionPolicy {
    fn create_event_group(&self, event: &Event, group_id: &str) -> EventGroup {
        EventGroup::new(group_id, event.group_size)
    }

    fn should_aggregate_events(&self, group: &EventGroup) -> bool {
        match group.expected_size() {
            Some(expected) => group.len() >= expected,
            None => false,
        }
    }

    fn aggregate_events(&self, group: &EventGroup) -> Result<Event> {
        if group.is_empty() {
            return Err(Error::routing(
                RoutingErrorCode::AggregationFailed,
                format!("group '{}' has no events to aggregate", group.group_id()),
            ));
        }

        let mut events: Vec<&Event> = group.events().iter().collect();
        // stable: events without a sequence keep arrival order
        events.sort_by_key(|e| e.sequence.unwrap_or(u32::MAX));

        let payloads = events.iter().map(|e| e.payload.clone()).collect();
        let mut aggregated = Event::new(serde_json::Value::Array(payloads))
            .with_correlation_id(group.group_id())
            .with_group_size(group.len());
        aggregated.source = events[0].source.clone();

        Ok(aggregated)
    }

    fn correlation_key(&self, event: &Event) -> Option<String> {
        self.key_strategy.extract(event)
    }
}
