//! Durable storage: recovery across restarts and update semantics.

use correlation_core::EventGroup;
use correlator::CorrelatorConfig;
use group_store::{build_store, GroupStore, SqliteGroupStore, StoreBackend, StoreConfig};
use integration_tests::fixtures::{self, member};
use integration_tests::mocks::BasicStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// A group persisted before a restart completes after it.
#[tokio::test]
async fn test_sqlite_groups_survive_restart() {
    let dir = tempdir().unwrap();
    let config = StoreConfig {
        backend: StoreBackend::Sqlite,
        path: dir.path().join("groups.db").to_string_lossy().into_owned(),
    };

    let created_at = {
        let store = build_store(&config).unwrap();
        let correlator = fixtures::correlator(store.clone(), CorrelatorConfig::new("orders"));
        correlator.process(member("o-7", 3, 1)).await.unwrap();
        correlator.process(member("o-7", 3, 3)).await.unwrap();
        store
            .retrieve("o-7", correlator.partition())
            .await
            .unwrap()
            .creation_time()
    };

    let store = build_store(&config).unwrap();
    let correlator = fixtures::correlator(store.clone(), CorrelatorConfig::new("orders"));
    assert_eq!(
        correlator.pending_groups().await.unwrap(),
        vec!["o-7".to_string()]
    );

    // creation time is kept, so expiry is measured from the first event
    let restored = store.retrieve("o-7", correlator.partition()).await.unwrap();
    assert_eq!(restored.creation_time(), created_at);

    let aggregated = correlator
        .process(member("o-7", 3, 2))
        .await
        .unwrap()
        .expect("third member completes the group");
    let seqs: Vec<_> = aggregated
        .payload
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

/// A restarted primary expires groups that aged while it was down.
#[tokio::test]
async fn test_sqlite_expiry_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("expiry.db");
    let config = CorrelatorConfig::new("exp").with_timeout(Duration::from_millis(30));

    {
        let store: Arc<dyn GroupStore> = Arc::new(SqliteGroupStore::open(&path).unwrap());
        let correlator = fixtures::correlator(store, config.clone());
        correlator.process(member("e-1", 5, 1)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(60)).await;

    let store: Arc<dyn GroupStore> = Arc::new(SqliteGroupStore::open(&path).unwrap());
    let correlator = fixtures::correlator(store, config);
    let report = correlator.expire_groups().await;
    assert_eq!(report.expired, 1);
    assert!(correlator.pending_groups().await.unwrap().is_empty());
}

/// Partitions isolate correlators sharing one database.
#[tokio::test]
async fn test_partitions_share_database() {
    let store: Arc<dyn GroupStore> = Arc::new(SqliteGroupStore::open_in_memory().unwrap());
    let orders = fixtures::correlator(store.clone(), CorrelatorConfig::new("orders"));
    let payments = fixtures::correlator(store.clone(), CorrelatorConfig::new("payments"));

    orders.process(member("k", 2, 1)).await.unwrap();
    payments.process(member("k", 3, 1)).await.unwrap();

    assert!(orders.process(member("k", 2, 2)).await.unwrap().is_some());
    assert_eq!(payments.pending_groups().await.unwrap(), vec!["k".to_string()]);
}

/// The fallback update restores the previous copy when the re-store fails.
#[tokio::test]
async fn test_default_update_restores_on_failure() {
    let store = BasicStore::new(fixtures::memory_store());
    let mut original = EventGroup::new("g", Some(3));
    original.add_event(member("g", 3, 1));
    store.store("g", &original, "p").await.unwrap();

    let mut updated = original.clone();
    updated.add_event(member("g", 3, 2));

    store.fail_next_store();
    assert!(store.update("g", &updated, "p").await.is_err());
    assert_eq!(store.retrieve("g", "p").await.unwrap(), original);

    store.update("g", &updated, "p").await.unwrap();
    assert_eq!(store.retrieve("g", "p").await.unwrap().len(), 2);
}
