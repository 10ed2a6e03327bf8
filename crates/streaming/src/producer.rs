//! Page producers.

use correlation_core::error::StreamErrorCode;
use correlation_core::{Error, Result};
use std::collections::VecDeque;
use tracing::debug;

/// Source of pages. An empty page means the source is exhausted.
pub trait Producer<T>: Send {
    fn produce(&mut self) -> Result<Vec<T>>;

    /// Total number of elements, when known up front.
    fn size(&self) -> Option<usize>;

    fn close(&mut self) -> Result<()>;
}

impl<T, P: Producer<T> + ?Sized> Producer<T> for Box<P> {
    fn produce(&mut self) -> Result<Vec<T>> {
        (**self).produce()
    }

    fn size(&self) -> Option<usize> {
        (**self).size()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Pages over an in-memory list.
pub struct ListProducer<T> {
    items: VecDeque<T>,
    page_size: usize,
    total: usize,
    closed: bool,
}

impl<T: Send> ListProducer<T> {
    pub fn new(items: Vec<T>, page_size: usize) -> Self {
        Self {
            total: items.len(),
            items: items.into(),
            page_size: page_size.max(1),
            closed: false,
        }
    }
}

impl<T: Send> Producer<T> for ListProducer<T> {
    fn produce(&mut self) -> Result<Vec<T>> {
        if self.closed {
            return Err(Error::closed("producer is closed"));
        }
        let n = self.page_size.min(self.items.len());
        Ok(self.items.drain(..n).collect())
    }

    fn size(&self) -> Option<usize> {
        Some(self.total)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.items.clear();
        Ok(())
    }
}

/// Lazily fetches pages through a `(offset, limit)` callback, e.g. a paged
/// query. Stops after an empty or short page.
pub struct PagingProducer<F> {
    fetch: F,
    offset: usize,
    page_size: usize,
    total: Option<usize>,
    done: bool,
}

impl<F> PagingProducer<F> {
    pub fn new(page_size: usize, fetch: F) -> Self {
        Self {
            fetch,
            offset: 0,
            page_size: page_size.max(1),
            total: None,
            done: false,
        }
    }

    /// Total element count reported by the source.
    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }
}

impl<T, F> Producer<T> for PagingProducer<F>
where
    F: FnMut(usize, usize) -> Result<Vec<T>> + Send,
{
    fn produce(&mut self) -> Result<Vec<T>> {
        if self.done {
            return Ok(Vec::new());
        }

        let page = (self.fetch)(self.offset, self.page_size).map_err(|e| {
            Error::stream(
                StreamErrorCode::ProducerFailed,
                format!("fetching page at offset {} failed: {}", self.offset, e),
            )
        })?;

        debug!(offset = self.offset, fetched = page.len(), "Fetched page");
        self.offset += page.len();
        if page.len() < self.page_size {
            self.done = true;
        }
        Ok(page)
    }

    fn size(&self) -> Option<usize> {
        self.total
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        Ok(())
    }
}
