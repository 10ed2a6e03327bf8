//! Growable in-memory cursor buffer.

use correlation_core::error::StreamErrorCode;
use correlation_core::{Error, Result};
use tracing::debug;

use crate::config::InMemoryCursorStreamConfig;

/// Byte buffer that grows in fixed increments up to a hard maximum.
#[derive(Debug)]
pub struct CursorBuffer {
    data: Vec<u8>,
    capacity: usize,
    increment: usize,
    max: usize,
}

impl CursorBuffer {
    pub fn new(config: &InMemoryCursorStreamConfig) -> Self {
        let capacity = config.initial_bytes();
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            increment: config.increment_bytes(),
            max: config.max_bytes(),
        }
    }

    /// Appends `bytes`, growing as needed. Nothing is written when the
    /// buffer cannot hold them.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let needed = self.data.len() + bytes.len();

        if needed > self.capacity {
            let grown = self.grown_capacity(needed).ok_or_else(|| {
                Error::stream(
                    StreamErrorCode::BufferFull,
                    format!(
                        "cursor buffer full: {} bytes needed, capacity {} of max {}",
                        needed, self.capacity, self.max
                    ),
                )
            })?;
            debug!(from = self.capacity, to = grown, "Growing cursor buffer");
            self.data.reserve(grown - self.data.len());
            self.capacity = grown;
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn grown_capacity(&self, needed: usize) -> Option<usize> {
        if self.increment == 0 {
            return None;
        }
        let steps = (needed - self.capacity).div_ceil(self.increment);
        let grown = self.capacity.checked_add(steps.checked_mul(self.increment)?)?;
        (grown <= self.max).then_some(grown)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current logical capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops the content, keeping the grown capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
