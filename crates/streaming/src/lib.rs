//! Lazy paging streams.
//!
//! - `Producer` pages a source, `Consumer` buffers one page at a time
//! - `ConsumerStreamingIterator` adapts a consumer to `Iterator`
//! - `CursorBuffer` is a bounded growable byte buffer

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod iterator;
pub mod producer;

pub use buffer::CursorBuffer;
pub use config::{DataUnit, InMemoryCursorStreamConfig};
pub use consumer::Consumer;
pub use iterator::ConsumerStreamingIterator;
pub use producer::{ListProducer, PagingProducer, Producer};
