//! Standard iterator over a consumer.

use correlation_core::Result;

use crate::consumer::Consumer;
use crate::producer::Producer;

/// Iterates a `Consumer` until it is drained. Yields `Err` once if the
/// producer fails; the consumer is closed afterwards. Dropping the iterator
/// closes the consumer and its producer.
pub struct ConsumerStreamingIterator<T> {
    consumer: Consumer<T>,
}

impl<T: Send + 'static> ConsumerStreamingIterator<T> {
    pub fn new(consumer: Consumer<T>) -> Self {
        Self { consumer }
    }

    pub fn from_producer(producer: impl Producer<T> + 'static) -> Self {
        Self::new(Consumer::new(producer))
    }

    pub fn has_next(&self) -> bool {
        !self.consumer.is_consumed()
    }

    pub fn size(&self) -> Option<usize> {
        self.consumer.size()
    }

    pub fn close(&self) -> Result<()> {
        self.consumer.close()
    }
}

impl<T: Send + 'static> Iterator for ConsumerStreamingIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        Some(self.consumer.consume())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.consumer.size())
    }
}
