//! Group store health checks.

use tracing::{debug, error};

use crate::store::GroupStore;

const HEALTH_PARTITION: &str = "__health__";

/// Check that the store answers a lookup.
pub async fn check_store(store: &dyn GroupStore) -> bool {
    match store.contains("health-check", HEALTH_PARTITION).await {
        Ok(_) => {
            debug!(backend = store.backend_type(), "Group store healthy");
            true
        }
        Err(e) => {
            error!(backend = store.backend_type(), error = %e, "Group store health check failed");
            false
        }
    }
}
