//! Buffered consumer over a page producer.
//!
//! Holds one page at a time. Closing is idempotent and closes the producer
//! exactly once; it may race with `consume` from another thread, which then
//! sees a clean closed error.

use correlation_core::error::StreamErrorCode;
use correlation_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::producer::Producer;

struct ConsumerState<T> {
    producer: Box<dyn Producer<T>>,
    buffer: VecDeque<T>,
    exhausted: bool,
    producer_closed: bool,
    pending_error: Option<Error>,
}

/// Element-at-a-time view over a `Producer`.
pub struct Consumer<T> {
    closed: AtomicBool,
    size: Option<usize>,
    state: Mutex<ConsumerState<T>>,
}

impl<T: Send + 'static> Consumer<T> {
    pub fn new(producer: impl Producer<T> + 'static) -> Self {
        Self {
            closed: AtomicBool::new(false),
            size: producer.size(),
            state: Mutex::new(ConsumerState {
                producer: Box::new(producer),
                buffer: VecDeque::new(),
                exhausted: false,
                producer_closed: false,
                pending_error: None,
            }),
        }
    }

    /// Next element. Fails with a closed error once the consumer is closed
    /// or drained.
    pub fn consume(&self) -> Result<T> {
        if self.is_closed() {
            return Err(Error::closed("consumer is closed"));
        }

        let mut state = self.state.lock();
        // closed while we waited for the lock
        if self.is_closed() {
            return Err(Error::closed("consumer is closed"));
        }

        if let Some(e) = state.pending_error.take() {
            self.close_locked(&mut state);
            return Err(e);
        }

        loop {
            if let Some(item) = state.buffer.pop_front() {
                return Ok(item);
            }
            if state.exhausted {
                self.close_locked(&mut state);
                return Err(Error::closed("consumer is exhausted"));
            }
            if let Err(e) = Self::fill(&mut state) {
                self.close_locked(&mut state);
                return Err(e);
            }
        }
    }

    /// Whether no element is left. Fetches the next page if the buffer is
    /// empty; a fetch failure is reported by the next `consume`.
    pub fn is_consumed(&self) -> bool {
        if self.is_closed() {
            return true;
        }

        let mut state = self.state.lock();
        if self.is_closed() {
            return true;
        }
        if state.pending_error.is_some() {
            return false;
        }

        while state.buffer.is_empty() && !state.exhausted {
            if let Err(e) = Self::fill(&mut state) {
                state.pending_error = Some(e);
                return false;
            }
        }

        if state.buffer.is_empty() {
            self.close_locked(&mut state);
            return true;
        }
        false
    }

    /// Total element count reported by the producer at construction.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the consumer and its producer. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut state = self.state.lock();
        self.close_producer(&mut state)
    }

    fn fill(state: &mut ConsumerState<T>) -> Result<()> {
        let page = state.producer.produce().map_err(|e| {
            if e.error_code() == Some(StreamErrorCode::ProducerFailed.code()) {
                e
            } else {
                Error::stream(StreamErrorCode::ProducerFailed, e.to_string())
            }
        })?;

        if page.is_empty() {
            state.exhausted = true;
        } else {
            debug!(elements = page.len(), "Buffered page");
            state.buffer.extend(page);
        }
        Ok(())
    }

    fn close_locked(&self, state: &mut ConsumerState<T>) {
        if let Err(e) = self.close_producer(state) {
            warn!(error = %e, "Closing producer failed");
        }
    }

    fn close_producer(&self, state: &mut ConsumerState<T>) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        state.buffer.clear();
        if state.producer_closed {
            return Ok(());
        }
        state.producer_closed = true;
        state.producer.close()
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.producer_closed {
            state.producer_closed = true;
            if let Err(e) = state.producer.close() {
                warn!(error = %e, "Closing producer on drop failed");
            }
        }
    }
}
