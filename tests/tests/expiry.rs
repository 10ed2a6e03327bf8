//! Expiry path: forced expiry, the primary-gated background sweep and the
//! configured expiry action.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use correlation_core::{Event, EventGroup, Result};
use correlator::{
    CollectionPolicy, CorrelationNotification, CorrelationPolicy, CorrelatorConfig,
    EventCorrelator, ExpiryAction,
};
use group_store::GroupStore;
use integration_tests::fixtures::{self, aged_group, member};
use integration_tests::mocks::{FailingStore, RecordingListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn sweep_config(prefix: &str) -> CorrelatorConfig {
    CorrelatorConfig::new(prefix)
        .with_timeout(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(20))
}

/// Forced expiry racing normal processing yields exactly one result.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_force_expiry_concurrent_with_process() {
    for round in 0..20 {
        let store = Arc::new(FailingStore::new(fixtures::memory_store()));
        let correlator = Arc::new(fixtures::correlator(
            store.clone(),
            CorrelatorConfig::new("force").with_expiry_action(ExpiryAction::Forward),
        ));
        let key = format!("f-{}", round);

        let mut handles = Vec::new();
        for seq in 1..=3 {
            let correlator = correlator.clone();
            let event = member(&key, 3, seq);
            handles.push(tokio::spawn(async move { correlator.process(event).await }));
        }
        let expiry = {
            let correlator = correlator.clone();
            let key = key.clone();
            tokio::spawn(async move { correlator.force_group_expiry(&key).await })
        };

        let mut outputs = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                outputs += 1;
            }
        }
        if expiry.await.unwrap().unwrap().is_some() {
            outputs += 1;
        }

        assert_eq!(outputs, 1, "round {}", round);
        assert_eq!(store.remove_count(&key), 1);
        assert!(!store.contains(&key, correlator.partition()).await.unwrap());
    }
}

/// With the primary flag off the sweep never expires anything; turning it
/// on expires the group within a few intervals.
#[tokio::test]
async fn test_sweep_runs_only_on_primary() {
    let store = fixtures::memory_store();
    let correlator = Arc::new(fixtures::correlator(
        store.clone(),
        sweep_config("primary").with_primary(false),
    ));
    correlator
        .add_event_group(aged_group("p-1", 3, 1, ChronoDuration::seconds(10)))
        .await
        .unwrap();

    correlator.start().unwrap();
    assert!(correlator.is_running());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.contains("p-1", correlator.partition()).await.unwrap());

    correlator.set_primary(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!store.contains("p-1", correlator.partition()).await.unwrap());

    correlator.stop().await;
    assert!(!correlator.is_running());
}

/// Young groups survive the sweep.
#[tokio::test]
async fn test_sweep_leaves_young_groups() {
    let store = fixtures::memory_store();
    let correlator = fixtures::correlator(
        store.clone(),
        CorrelatorConfig::new("young").with_timeout(Duration::from_secs(3600)),
    );
    correlator.process(member("y-1", 2, 1)).await.unwrap();

    let report = correlator.sweep_tick().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.expired, 0);
    assert!(store.contains("y-1", correlator.partition()).await.unwrap());
}

/// No timeout configured means the default policy never expires.
#[tokio::test]
async fn test_zero_timeout_disables_expiry() {
    let store = fixtures::memory_store();
    let correlator = fixtures::correlator(store.clone(), CorrelatorConfig::new("never"));
    correlator
        .add_event_group(aged_group("n-1", 3, 1, ChronoDuration::days(30)))
        .await
        .unwrap();

    let report = correlator.expire_groups().await;
    assert_eq!(report.expired, 0);
    assert!(store.contains("n-1", correlator.partition()).await.unwrap());
}

/// Forwarded results of the background sweep reach the expiry output.
#[tokio::test]
async fn test_forward_action_emits_partial_result() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let correlator = Arc::new(
        fixtures::correlator(
            fixtures::memory_store(),
            sweep_config("forward").with_expiry_action(ExpiryAction::Forward),
        )
        .with_expiry_output(tx),
    );
    correlator.process(member("fw-1", 3, 1)).await.unwrap();
    correlator.process(member("fw-1", 3, 2)).await.unwrap();

    correlator.start().unwrap();
    let forwarded = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("sweep should forward the expired group")
        .unwrap();
    correlator.stop().await;

    assert_eq!(forwarded.correlation_id.as_deref(), Some("fw-1"));
    assert_eq!(forwarded.group_size, Some(2));

    // late member of the expired group is dropped
    assert!(correlator.process(member("fw-1", 3, 3)).await.unwrap().is_none());
    assert!(correlator.pending_groups().await.unwrap().is_empty());
}

/// The default action hands the expired events to listeners as a timeout.
#[tokio::test]
async fn test_fail_action_reports_timeout_with_events() {
    let listener = RecordingListener::new();
    let correlator = fixtures::correlator(fixtures::memory_store(), sweep_config("fail"))
        .with_listener(listener.clone());
    correlator
        .add_event_group(aged_group("t-1", 4, 2, ChronoDuration::seconds(5)))
        .await
        .unwrap();

    let report = correlator.expire_groups().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.forwarded, 0);

    let timeout = listener
        .notifications()
        .into_iter()
        .find_map(|n| match n {
            CorrelationNotification::CorrelationTimeout { group_id, events, .. } => {
                Some((group_id, events))
            }
            _ => None,
        })
        .expect("timeout notification");
    assert_eq!(timeout.0, "t-1");
    assert_eq!(timeout.1.len(), 2);
    assert_eq!(listener.count("group_expired"), 1);
}

/// Discard removes quietly.
#[tokio::test]
async fn test_discard_action() {
    let listener = RecordingListener::new();
    let store = fixtures::memory_store();
    let correlator = fixtures::correlator(
        store.clone(),
        sweep_config("discard").with_expiry_action(ExpiryAction::Discard),
    )
    .with_listener(listener.clone());
    correlator
        .add_event_group(aged_group("x-1", 4, 1, ChronoDuration::seconds(5)))
        .await
        .unwrap();

    let report = correlator.expire_groups().await;
    assert_eq!(report.expired, 1);
    assert!(report.results.is_empty());
    assert_eq!(listener.count("group_discarded"), 1);
    assert_eq!(listener.count("correlation_timeout"), 0);
    assert!(store.is_empty(correlator.partition()));
}

/// One failing group does not stop the sweep for the rest.
#[tokio::test]
async fn test_sweep_continues_past_failures() {
    let store = Arc::new(FailingStore::new(fixtures::memory_store()));
    let correlator = fixtures::correlator(store.clone(), sweep_config("partial"));
    for key in ["a", "b", "c"] {
        correlator
            .add_event_group(aged_group(key, 4, 1, ChronoDuration::seconds(5)))
            .await
            .unwrap();
    }

    store.set_fail_remove(true);
    let report = correlator.expire_groups().await;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.failed, 3);
    assert_eq!(correlator.pending_groups().await.unwrap().len(), 3);

    store.set_fail_remove(false);
    let report = correlator.expire_groups().await;
    assert_eq!(report.expired, 3);
    assert!(correlator.pending_groups().await.unwrap().is_empty());
}

/// Forwarding without an expiry output cannot run in the background; a
/// direct sweep still hands the result to its caller.
#[tokio::test]
async fn test_forward_without_output_keeps_results_with_caller() {
    let store = fixtures::memory_store();
    let correlator = Arc::new(fixtures::correlator(
        store.clone(),
        sweep_config("no-sink").with_expiry_action(ExpiryAction::Forward),
    ));
    correlator
        .add_event_group(aged_group("ns-1", 3, 2, ChronoDuration::seconds(5)))
        .await
        .unwrap();

    let err = correlator.start().unwrap_err();
    assert_eq!(err.error_code(), Some("CORR_002"));
    assert!(!correlator.is_running());
    assert!(store.contains("ns-1", correlator.partition()).await.unwrap());

    let report = correlator.sweep_tick().await.unwrap();
    assert_eq!(report.forwarded, 1);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].group_size, Some(2));
}

/// A closed expiry output puts the group back instead of losing it.
#[tokio::test]
async fn test_closed_expiry_output_restores_group() {
    let listener = RecordingListener::new();
    let store = fixtures::memory_store();
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let correlator = Arc::new(
        fixtures::correlator(
            store.clone(),
            sweep_config("closed").with_expiry_action(ExpiryAction::Forward),
        )
        .with_expiry_output(tx)
        .with_listener(listener.clone()),
    );
    correlator
        .add_event_group(aged_group("c-1", 3, 2, ChronoDuration::seconds(5)))
        .await
        .unwrap();

    correlator.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    correlator.stop().await;

    let stored = store.retrieve("c-1", correlator.partition()).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(listener.count("group_expired"), 0);

    let report = correlator.sweep_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.forwarded, 0);

    // not marked completed, so the group still accepts its last member
    let completed = correlator.process(member("c-1", 3, 3)).await.unwrap();
    assert!(completed.is_some());
}

/// Expires groups holding at least two events, with or without a timeout.
struct ExpireAtTwo(CollectionPolicy);

impl CorrelationPolicy for ExpireAtTwo {
    fn create_event_group(&self, event: &Event, group_id: &str) -> EventGroup {
        self.0.create_event_group(event, group_id)
    }

    fn should_aggregate_events(&self, group: &EventGroup) -> bool {
        self.0.should_aggregate_events(group)
    }

    fn aggregate_events(&self, group: &EventGroup) -> Result<Event> {
        self.0.aggregate_events(group)
    }

    fn is_group_expired(
        &self,
        group: &EventGroup,
        _timeout: Option<Duration>,
        _now: DateTime<Utc>,
    ) -> bool {
        group.len() >= 2
    }
}

/// A policy's own expiry rule applies even with no timeout configured.
#[tokio::test]
async fn test_policy_expiry_rule_without_timeout() {
    let store = fixtures::memory_store();
    let correlator = EventCorrelator::new(
        ExpireAtTwo(CollectionPolicy::new()),
        store.clone(),
        CorrelatorConfig::new("custom").with_expiry_action(ExpiryAction::Forward),
    )
    .unwrap();
    assert_eq!(correlator.config().timeout(), None);

    correlator.process(member("two", 5, 1)).await.unwrap();
    correlator.process(member("two", 5, 2)).await.unwrap();
    correlator.process(member("one", 5, 1)).await.unwrap();

    let report = correlator.expire_groups().await;
    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.results[0].correlation_id.as_deref(), Some("two"));
    assert_eq!(correlator.pending_groups().await.unwrap(), vec!["one".to_string()]);
}
