//! In-memory cursor stream sizing.

use correlation_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

/// Unit for buffer sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataUnit {
    Byte,
    #[default]
    Kb,
    Mb,
}

impl DataUnit {
    pub fn to_bytes(&self, amount: i64) -> usize {
        let factor: i64 = match self {
            Self::Byte => 1,
            Self::Kb => 1024,
            Self::Mb => 1024 * 1024,
        };
        amount.saturating_mul(factor).max(0) as usize
    }
}

/// Growable buffer configuration.
///
/// Sizes are signed so negative input from configuration is rejected
/// instead of wrapping.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_bounds"))]
pub struct InMemoryCursorStreamConfig {
    #[validate(range(min = 1))]
    pub initial_size: i64,
    #[validate(range(min = 0))]
    pub increment: i64,
    #[validate(range(min = 1))]
    pub max_size: i64,
    #[serde(default)]
    pub unit: DataUnit,
}

fn bound_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn validate_bounds(config: &InMemoryCursorStreamConfig) -> std::result::Result<(), ValidationError> {
    if config.initial_size > config.max_size {
        return Err(bound_error(
            "initial_exceeds_max",
            "initial_size must not exceed max_size",
        ));
    }
    if config.increment > config.max_size {
        return Err(bound_error(
            "increment_exceeds_max",
            "increment must not exceed max_size",
        ));
    }
    match config.initial_size.checked_add(config.increment) {
        Some(sum) if sum <= config.max_size => Ok(()),
        _ => Err(bound_error(
            "first_growth_exceeds_max",
            "initial_size + increment must not exceed max_size",
        )),
    }
}

impl InMemoryCursorStreamConfig {
    /// Builds a validated config in kilobytes.
    pub fn new(initial_size: i64, increment: i64, max_size: i64) -> Result<Self> {
        Self {
            initial_size,
            increment,
            max_size,
            unit: DataUnit::default(),
        }
        .validated()
    }

    pub fn with_unit(mut self, unit: DataUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Checks a config built by deserialization.
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| Error::validation(format!("{}", e)))?;
        Ok(self)
    }

    pub fn initial_bytes(&self) -> usize {
        self.unit.to_bytes(self.initial_size)
    }

    pub fn increment_bytes(&self) -> usize {
        self.unit.to_bytes(self.increment)
    }

    pub fn max_bytes(&self) -> usize {
        self.unit.to_bytes(self.max_size)
    }
}

impl Default for InMemoryCursorStreamConfig {
    fn default() -> Self {
        Self {
            initial_size: 512,
            increment: 512,
            max_size: 1024,
            unit: DataUnit::Kb,
        }
    }
}
