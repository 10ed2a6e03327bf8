//! Correlator configuration.

use correlation_core::error::ConfigErrorCode;
use correlation_core::limits::{
    DEFAULT_GROUP_TIMEOUT, DEFAULT_SWEEP_INTERVAL, MAX_MERGE_ATTEMPTS, MAX_PROCESSED_GROUPS,
    MAX_READY_RESPONSES,
};
use correlation_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the expiry path does with a timed-out group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryAction {
    /// Aggregate the partial group and emit the result
    Forward,
    /// Drop the group silently (notification only)
    Discard,
    /// Drop the group and raise a correlation timeout to listeners
    #[default]
    Fail,
}

/// Event correlator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Partition prefix; groups live in `<prefix>.eventGroups`
    #[serde(default = "default_partition_prefix")]
    pub partition_prefix: String,
    /// Group timeout in milliseconds (0 leaves expiry to the policy)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether this node runs the expiry sweep
    #[serde(default = "default_primary")]
    pub primary: bool,
    /// Expiry sweep polling interval in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Expiry behavior (forward, discard, fail)
    #[serde(default)]
    pub expiry_action: ExpiryAction,
    /// Completed group ids remembered to reject late events (0 disables)
    #[serde(default = "default_max_processed_groups")]
    pub max_processed_groups: usize,
    /// Attempts to resolve a duplicate-create race
    #[serde(default = "default_max_merge_attempts")]
    pub max_merge_attempts: u32,
    /// Unclaimed results kept for `get_response` (0 keeps none)
    #[serde(default = "default_max_ready_responses")]
    pub max_ready_responses: usize,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_partition_prefix() -> String {
    "correlator".to_string()
}

fn default_timeout_ms() -> u64 {
    millis(DEFAULT_GROUP_TIMEOUT)
}

fn default_primary() -> bool {
    true
}

fn default_sweep_interval_ms() -> u64 {
    millis(DEFAULT_SWEEP_INTERVAL)
}

fn default_max_processed_groups() -> usize {
    MAX_PROCESSED_GROUPS
}

fn default_max_merge_attempts() -> u32 {
    MAX_MERGE_ATTEMPTS
}

fn default_max_ready_responses() -> usize {
    MAX_READY_RESPONSES
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            partition_prefix: default_partition_prefix(),
            timeout_ms: default_timeout_ms(),
            primary: default_primary(),
            sweep_interval_ms: default_sweep_interval_ms(),
            expiry_action: ExpiryAction::default(),
            max_processed_groups: default_max_processed_groups(),
            max_merge_attempts: default_max_merge_attempts(),
            max_ready_responses: default_max_ready_responses(),
        }
    }
}

impl CorrelatorConfig {
    pub fn new(partition_prefix: impl Into<String>) -> Self {
        Self {
            partition_prefix: partition_prefix.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = millis(interval);
        self
    }

    pub fn with_expiry_action(mut self, action: ExpiryAction) -> Self {
        self.expiry_action = action;
        self
    }

    pub fn with_max_processed_groups(mut self, max: usize) -> Self {
        self.max_processed_groups = max;
        self
    }

    pub fn with_max_ready_responses(mut self, max: usize) -> Self {
        self.max_ready_responses = max;
        self
    }

    /// Group timeout, `None` when zero.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Rejects settings the correlator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.partition_prefix.trim().is_empty() {
            return Err(Error::config(
                ConfigErrorCode::InvalidSetting,
                "partition_prefix must not be empty",
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::config(
                ConfigErrorCode::InvalidSetting,
                "sweep_interval_ms must be greater than zero",
            ));
        }
        if self.max_merge_attempts == 0 {
            return Err(Error::config(
                ConfigErrorCode::InvalidSetting,
                "max_merge_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}
