//! Partitioned event group stores.
//!
//! - `GroupStore` contract consumed by the correlator
//! - In-memory backend for tests and single-node use
//! - SQLite backend for durable storage across restarts

pub mod config;
pub mod health;
pub mod memory;
pub mod partition;
pub mod sqlite;
pub mod store;

pub use config::*;
pub use memory::InMemoryGroupStore;
pub use partition::partition_name;
pub use sqlite::SqliteGroupStore;
pub use store::GroupStore;
