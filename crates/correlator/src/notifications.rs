//! Correlation notifications and instrumentation listeners.
//!
//! Listeners are best effort. A listener that errors or panics is logged and
//! skipped; it never changes what the correlator stores or emits.

use correlation_core::error::RoutingErrorCode;
use correlation_core::{Event, Result};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExpiryAction;

/// Notification types.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelationNotification {
    /// First event for a new correlation key
    GroupCreated { group_id: String, partition: String },
    /// Event appended to a pending group
    EventAbsorbed {
        group_id: String,
        event_id: Uuid,
        group_len: usize,
    },
    /// Group completed normally
    GroupAggregated {
        group_id: String,
        event_count: usize,
        result_id: Uuid,
    },
    /// Group completed by the expiry path
    GroupExpired {
        group_id: String,
        event_count: usize,
        action: ExpiryAction,
    },
    /// Expired group dropped without output
    GroupDiscarded { group_id: String, event_count: usize },
    /// Expired group handed over as a timeout failure
    CorrelationTimeout {
        group_id: String,
        timeout_ms: u64,
        events: Vec<Event>,
    },
    /// Event arrived for a group that already completed
    MissedGroup { group_id: String, event_id: Uuid },
    /// A caller stopped waiting for a group's result
    ResponseTimeout { group_id: String, timeout_ms: u64 },
    /// Concurrent create detected, event merged into the existing group
    DuplicateCreateMerged { group_id: String, attempt: u32 },
}

impl CorrelationNotification {
    pub fn group_id(&self) -> &str {
        match self {
            Self::GroupCreated { group_id, .. }
            | Self::EventAbsorbed { group_id, .. }
            | Self::GroupAggregated { group_id, .. }
            | Self::GroupExpired { group_id, .. }
            | Self::GroupDiscarded { group_id, .. }
            | Self::CorrelationTimeout { group_id, .. }
            | Self::MissedGroup { group_id, .. }
            | Self::ResponseTimeout { group_id, .. }
            | Self::DuplicateCreateMerged { group_id, .. } => group_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GroupCreated { .. } => "group_created",
            Self::EventAbsorbed { .. } => "event_absorbed",
            Self::GroupAggregated { .. } => "group_aggregated",
            Self::GroupExpired { .. } => "group_expired",
            Self::GroupDiscarded { .. } => "group_discarded",
            Self::CorrelationTimeout { .. } => "correlation_timeout",
            Self::MissedGroup { .. } => "missed_group",
            Self::ResponseTimeout { .. } => "response_timeout",
            Self::DuplicateCreateMerged { .. } => "duplicate_create_merged",
        }
    }
}

/// Receives correlation notifications and processing callbacks.
pub trait CorrelationListener: Send + Sync {
    fn on_notification(&self, notification: &CorrelationNotification) -> Result<()>;

    /// Called before an event enters its group lock.
    fn before_processing(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Called once processing for an event finished, successfully or not.
    fn after_processing(&self, _group_id: &str, _elapsed: Duration) -> Result<()> {
        Ok(())
    }
}

/// Logs every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl CorrelationListener for LogListener {
    fn on_notification(&self, notification: &CorrelationNotification) -> Result<()> {
        match notification {
            CorrelationNotification::CorrelationTimeout {
                group_id,
                timeout_ms,
                events,
            } => {
                warn!(
                    group_id = %group_id,
                    timeout_ms = timeout_ms,
                    events = events.len(),
                    code = RoutingErrorCode::CorrelationTimeout.code(),
                    "Correlation timed out"
                );
            }
            CorrelationNotification::ResponseTimeout {
                group_id,
                timeout_ms,
            } => {
                warn!(
                    group_id = %group_id,
                    timeout_ms = timeout_ms,
                    code = RoutingErrorCode::CorrelationTimeout.code(),
                    "No result within response timeout"
                );
            }
            CorrelationNotification::MissedGroup { group_id, event_id } => {
                warn!(group_id = %group_id, event_id = %event_id, "Event for completed group dropped");
            }
            CorrelationNotification::GroupAggregated { .. }
            | CorrelationNotification::GroupExpired { .. }
            | CorrelationNotification::GroupDiscarded { .. } => {
                info!(notification = ?notification, "Notification");
            }
            _ => {
                debug!(notification = ?notification, "Notification");
            }
        }
        Ok(())
    }
}

/// Fan-out over registered listeners.
#[derive(Default, Clone)]
pub(crate) struct Listeners {
    listeners: Vec<Arc<dyn CorrelationListener>>,
}

impl Listeners {
    pub(crate) fn push(&mut self, listener: Arc<dyn CorrelationListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn notify(&self, notification: CorrelationNotification) {
        self.each(notification.kind(), |l| l.on_notification(&notification));
    }

    pub(crate) fn before_processing(&self, event: &Event) {
        self.each("before_processing", |l| l.before_processing(event));
    }

    pub(crate) fn after_processing(&self, group_id: &str, elapsed: Duration) {
        self.each("after_processing", |l| l.after_processing(group_id, elapsed));
    }

    fn each<F>(&self, callback: &'static str, f: F)
    where
        F: Fn(&dyn CorrelationListener) -> Result<()>,
    {
        for listener in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    metrics().listener_errors.inc();
                    warn!(callback = callback, error = %e, "Listener failed");
                }
                Err(_) => {
                    metrics().listener_errors.inc();
                    warn!(callback = callback, "Listener panicked");
                }
            }
        }
    }
}
