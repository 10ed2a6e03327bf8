//! Group store configuration.

use correlation_core::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::memory::InMemoryGroupStore;
use crate::sqlite::SqliteGroupStore;
use crate::store::GroupStore;

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Group store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend (memory, sqlite)
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database path
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "data/correlator.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_path(),
        }
    }
}

/// Builds the configured store.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn GroupStore>> {
    let store: Arc<dyn GroupStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryGroupStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteGroupStore::open(&config.path)?),
    };

    info!(backend = store.backend_type(), "Group store ready");
    Ok(store)
}
