//! Event correlator: turns correlated inbound events into aggregated results.
//!
//! Every mutation of a group happens under that group's lock. The group is
//! persisted before the policy aggregates it, so a failing aggregation never
//! loses accepted events. Removal from the store is the single source of
//! truth for completion: whoever removes the group emits the result.

use chrono::Utc;
use correlation_core::error::{ConfigErrorCode, RoutingErrorCode, StoreErrorCode};
use correlation_core::{Error, Event, EventGroup, Result};
use group_store::{partition_name, GroupStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::{health, metrics};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{CorrelatorConfig, ExpiryAction};
use crate::locks::GroupLocks;
use crate::notifications::{CorrelationListener, CorrelationNotification, Listeners};
use crate::policy::CorrelationPolicy;
use crate::processed::ProcessedGroups;
use crate::responses::Responses;
use crate::scheduler::{spawn_sweep, SweepHandle};

/// Outcome of one expiry sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Groups inspected
    pub scanned: usize,
    /// Groups completed by the expiry path
    pub expired: usize,
    /// Expired groups aggregated into a result
    pub forwarded: usize,
    /// Groups whose expiry failed; they stay stored
    pub failed: usize,
    /// Results of forwarded groups, when no expiry output took them
    pub results: Vec<Event>,
}

/// Event correlator.
pub struct EventCorrelator<P: CorrelationPolicy> {
    policy: P,
    store: Arc<dyn GroupStore>,
    config: CorrelatorConfig,
    partition: String,
    locks: GroupLocks,
    processed: ProcessedGroups,
    responses: Responses,
    listeners: Listeners,
    primary: AtomicBool,
    sweep: Mutex<Option<SweepHandle>>,
    expiry_output: Option<mpsc::UnboundedSender<Event>>,
}

impl<P: CorrelationPolicy + 'static> EventCorrelator<P> {
    pub fn new(policy: P, store: Arc<dyn GroupStore>, config: CorrelatorConfig) -> Result<Self> {
        config.validate()?;

        let partition = partition_name(&config.partition_prefix);
        info!(
            partition = %partition,
            backend = store.backend_type(),
            timeout_ms = config.timeout_ms,
            expiry_action = ?config.expiry_action,
            primary = config.primary,
            "Event correlator created"
        );

        Ok(Self {
            policy,
            store,
            processed: ProcessedGroups::new(config.max_processed_groups),
            responses: Responses::new(config.max_ready_responses),
            primary: AtomicBool::new(config.primary),
            partition,
            config,
            locks: GroupLocks::new(),
            listeners: Listeners::default(),
            sweep: Mutex::new(None),
            expiry_output: None,
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn CorrelationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Channel receiving results of groups forwarded by the background sweep.
    /// Required by `start` when the expiry action is `Forward`.
    pub fn with_expiry_output(mut self, output: mpsc::UnboundedSender<Event>) -> Self {
        self.expiry_output = Some(output);
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Keys of the groups still pending in the partition.
    pub async fn pending_groups(&self) -> Result<Vec<String>> {
        self.store.all_keys(&self.partition).await
    }

    /// Number of group locks currently registered.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Callers currently blocked in `get_response`.
    pub fn waiting_responses(&self) -> usize {
        self.responses.waiting()
    }

    /// Processes one event.
    ///
    /// Returns the aggregated event when this event completed its group and
    /// `None` when it was absorbed.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn process(&self, event: Event) -> Result<Option<Event>> {
        let start = Instant::now();
        metrics().events_received.inc();

        let group_id = self.policy.correlation_key(&event).ok_or_else(|| {
            Error::config(
                ConfigErrorCode::MissingCorrelationKey,
                format!("no correlation key could be resolved for event {}", event.id),
            )
        })?;

        self.listeners.before_processing(&event);

        let result = {
            let _guard = self.locks.acquire(&group_id).await;
            self.process_locked(&group_id, event).await
        };

        let elapsed = start.elapsed();
        metrics()
            .processing_latency_ms
            .observe(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self.listeners.after_processing(&group_id, elapsed);

        result
    }

    async fn process_locked(&self, group_id: &str, event: Event) -> Result<Option<Event>> {
        if self.processed.contains(group_id) {
            metrics().events_missed.inc();
            self.listeners.notify(CorrelationNotification::MissedGroup {
                group_id: group_id.to_string(),
                event_id: event.id,
            });
            return Ok(None);
        }

        let event_id = event.id;
        let group = self.persist_event(group_id, event).await?;

        if !self.policy.should_aggregate_events(&group) {
            return Ok(None);
        }

        let aggregated = self.aggregate(&group)?;
        if !self.remove_completed(group_id).await? {
            // completed elsewhere after our update, possibly without this event
            metrics().events_missed.inc();
            warn!(group_id = %group_id, event_id = %event_id, "Group completed elsewhere after event was stored");
            self.listeners.notify(CorrelationNotification::MissedGroup {
                group_id: group_id.to_string(),
                event_id,
            });
            return Ok(None);
        }

        self.processed.insert(group_id).await;
        self.responses.publish(group_id, &aggregated, true).await;
        metrics().groups_aggregated.inc();
        debug!(group_id = %group_id, events = group.len(), "Group aggregated");
        self.listeners
            .notify(CorrelationNotification::GroupAggregated {
                group_id: group_id.to_string(),
                event_count: group.len(),
                result_id: aggregated.id,
            });

        Ok(Some(aggregated))
    }

    /// Appends the event to its stored group, creating the group if needed.
    /// Returns the group exactly as persisted.
    async fn persist_event(&self, group_id: &str, event: Event) -> Result<EventGroup> {
        let event_id = event.id;

        for attempt in 1..=self.config.max_merge_attempts {
            match self.store.retrieve(group_id, &self.partition).await {
                Ok(mut group) => {
                    group.add_event(event.clone());
                    match self.store.update(group_id, &group, &self.partition).await {
                        Ok(()) => {
                            metrics().events_absorbed.inc();
                            self.listeners.notify(CorrelationNotification::EventAbsorbed {
                                group_id: group_id.to_string(),
                                event_id,
                                group_len: group.len(),
                            });
                            return Ok(group);
                        }
                        // completed or expired elsewhere between retrieve and update
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(self.store_failure(group_id, e)),
                    }
                }
                Err(e) if e.is_not_found() => {
                    let mut group = self.policy.create_event_group(&event, group_id);
                    group.add_event(event.clone());

                    match self.store.store(group_id, &group, &self.partition).await {
                        Ok(()) => {
                            metrics().groups_created.inc();
                            metrics().events_absorbed.inc();
                            self.listeners.notify(CorrelationNotification::GroupCreated {
                                group_id: group_id.to_string(),
                                partition: self.partition.clone(),
                            });
                            return Ok(group);
                        }
                        Err(e) if e.is_already_exists() => {
                            metrics().duplicate_create_merges.inc();
                            debug!(group_id = %group_id, attempt = attempt, "Concurrent create, merging");
                            self.listeners
                                .notify(CorrelationNotification::DuplicateCreateMerged {
                                    group_id: group_id.to_string(),
                                    attempt,
                                });
                        }
                        Err(e) => return Err(self.store_failure(group_id, e)),
                    }
                }
                Err(e) => return Err(self.store_failure(group_id, e)),
            }
        }

        metrics().store_errors.inc();
        Err(Error::store(
            StoreErrorCode::Io,
            format!(
                "group '{}' kept changing concurrently after {} attempts",
                group_id, self.config.max_merge_attempts
            ),
        ))
    }

    fn aggregate(&self, group: &EventGroup) -> Result<Event> {
        self.policy.aggregate_events(group).map_err(|e| {
            metrics().aggregation_errors.inc();
            error!(
                group_id = %group.group_id(),
                events = group.len(),
                error = %e,
                "Aggregation failed, group kept in store"
            );
            if e.is_routing() {
                e
            } else {
                Error::routing(
                    RoutingErrorCode::AggregationFailed,
                    format!("aggregating group '{}' failed: {}", group.group_id(), e),
                )
            }
        })
    }

    /// Removes a completed group. `false` means another party already did.
    async fn remove_completed(&self, group_id: &str) -> Result<bool> {
        match self.store.remove(group_id, &self.partition).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(group_id = %group_id, "Group already completed elsewhere, not emitting");
                Ok(false)
            }
            Err(e) => Err(self.store_failure(group_id, e)),
        }
    }

    fn store_failure(&self, group_id: &str, e: Error) -> Error {
        metrics().store_errors.inc();
        error!(group_id = %group_id, partition = %self.partition, error = %e, "Group store operation failed");
        e
    }

    /// Registers an externally built group, e.g. one restored from a backup.
    pub async fn add_event_group(&self, group: EventGroup) -> Result<()> {
        let group_id = group.group_id().to_string();
        let _guard = self.locks.acquire(&group_id).await;

        self.store
            .store(&group_id, &group, &self.partition)
            .await
            .map_err(|e| {
                if e.is_already_exists() {
                    e
                } else {
                    self.store_failure(&group_id, e)
                }
            })?;

        metrics().groups_created.inc();
        self.listeners.notify(CorrelationNotification::GroupCreated {
            group_id,
            partition: self.partition.clone(),
        });
        Ok(())
    }

    /// Runs the expiry path for one group now, regardless of its age.
    ///
    /// Returns the aggregated result when the expiry action forwards and
    /// `None` when the group is gone or the action emits nothing.
    #[instrument(skip(self))]
    pub async fn force_group_expiry(&self, group_id: &str) -> Result<Option<Event>> {
        let _guard = self.locks.acquire(group_id).await;

        let group = match self.store.retrieve(group_id, &self.partition).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(self.store_failure(group_id, e)),
        };

        self.expire_group(group_id, group, None).await
    }

    /// Must be called with the group's lock held.
    ///
    /// With `output` set, a forwarded result is sent there before the group
    /// counts as completed. If the send fails the group is stored again.
    async fn expire_group(
        &self,
        group_id: &str,
        group: EventGroup,
        output: Option<&mpsc::UnboundedSender<Event>>,
    ) -> Result<Option<Event>> {
        let action = self.config.expiry_action;

        let result = match action {
            ExpiryAction::Forward => {
                let aggregated = self.aggregate(&group)?;
                if !self.remove_completed(group_id).await? {
                    return Ok(None);
                }
                if let Some(output) = output {
                    if output.send(aggregated.clone()).is_err() {
                        return Err(self.restore_undelivered(group_id, &group).await);
                    }
                }
                metrics().groups_forwarded_on_expiry.inc();
                self.responses.publish(group_id, &aggregated, false).await;
                Some(aggregated)
            }
            ExpiryAction::Discard | ExpiryAction::Fail => {
                if !self.remove_completed(group_id).await? {
                    return Ok(None);
                }
                None
            }
        };

        self.processed.insert(group_id).await;
        metrics().groups_expired.inc();
        info!(group_id = %group_id, events = group.len(), action = ?action, "Group expired");

        self.listeners.notify(CorrelationNotification::GroupExpired {
            group_id: group_id.to_string(),
            event_count: group.len(),
            action,
        });

        match action {
            ExpiryAction::Forward => {}
            ExpiryAction::Discard => {
                metrics().groups_discarded.inc();
                self.listeners.notify(CorrelationNotification::GroupDiscarded {
                    group_id: group_id.to_string(),
                    event_count: group.len(),
                });
            }
            ExpiryAction::Fail => {
                self.listeners
                    .notify(CorrelationNotification::CorrelationTimeout {
                        group_id: group_id.to_string(),
                        timeout_ms: self.config.timeout_ms,
                        events: group.into_events(),
                    });
            }
        }

        Ok(result)
    }

    /// Puts back a group whose forwarded result had nowhere to go.
    async fn restore_undelivered(&self, group_id: &str, group: &EventGroup) -> Error {
        match self.store.store(group_id, group, &self.partition).await {
            Ok(()) => {
                warn!(group_id = %group_id, events = group.len(), "Expiry output closed, group restored");
                Error::routing(
                    RoutingErrorCode::DeliveryFailed,
                    format!("expiry output closed, group '{}' restored", group_id),
                )
            }
            Err(e) => {
                let event_ids: Vec<String> =
                    group.events().iter().map(|e| e.id.to_string()).collect();
                error!(
                    group_id = %group_id,
                    events = ?event_ids,
                    "Expiry output closed and group could not be restored"
                );
                self.store_failure(group_id, e)
            }
        }
    }

    /// One expiry sweep over the partition. Failures on one group are logged
    /// and the sweep moves on. Forwarded results are returned in the report.
    pub async fn expire_groups(&self) -> SweepReport {
        self.sweep(None).await
    }

    async fn sweep(&self, output: Option<&mpsc::UnboundedSender<Event>>) -> SweepReport {
        let mut report = SweepReport::default();
        metrics().sweeps_run.inc();

        let keys = match self.store.all_keys(&self.partition).await {
            Ok(keys) => {
                health().store.set_healthy();
                keys
            }
            Err(e) => {
                metrics().sweep_errors.inc();
                health().store.set_unhealthy(e.to_string());
                error!(partition = %self.partition, error = %e, "Expiry sweep could not list groups");
                return report;
            }
        };

        report.scanned = keys.len();
        metrics().pending_groups.set(keys.len() as u64);

        let timeout = self.config.timeout();

        for key in keys {
            let _guard = self.locks.acquire(&key).await;

            let group = match self.store.retrieve(&key, &self.partition).await {
                Ok(group) => group,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    report.failed += 1;
                    metrics().sweep_errors.inc();
                    warn!(group_id = %key, error = %e, "Expiry sweep could not load group");
                    continue;
                }
            };

            if !self.policy.is_group_expired(&group, timeout, Utc::now()) {
                continue;
            }

            match self.expire_group(&key, group, output).await {
                Ok(Some(event)) => {
                    report.expired += 1;
                    report.forwarded += 1;
                    if output.is_none() {
                        report.results.push(event);
                    }
                }
                Ok(None) => report.expired += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics().sweep_errors.inc();
                    warn!(group_id = %key, error = %e, "Expiry failed, group kept for next sweep");
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                forwarded = report.forwarded,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }

        report
    }

    /// Sweep tick as run by the background task: skipped unless primary.
    /// Forwarded results go to the expiry output when one is configured and
    /// are returned in the report otherwise.
    pub async fn sweep_tick(&self) -> Option<SweepReport> {
        if !self.is_primary() {
            return None;
        }

        let report = self.sweep(self.expiry_output.as_ref()).await;
        self.locks.prune();
        Some(report)
    }

    /// Starts the background expiry sweep. No-op if already running.
    ///
    /// Fails with `CORR_002` when the expiry action is `Forward` and no
    /// expiry output is set, since the background task has no caller to
    /// hand results to.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.config.expiry_action == ExpiryAction::Forward && self.expiry_output.is_none() {
            return Err(Error::config(
                ConfigErrorCode::InvalidSetting,
                "expiry_action 'forward' needs an expiry output for the background sweep",
            ));
        }

        let mut sweep = self.sweep.lock();
        if sweep.is_some() {
            debug!(partition = %self.partition, "Expiry sweep already running");
            return Ok(());
        }

        let correlator = Arc::downgrade(self);
        *sweep = Some(spawn_sweep(self.config.sweep_interval(), move || {
            let correlator = correlator.clone();
            async move {
                if let Some(correlator) = correlator.upgrade() {
                    correlator.sweep_tick().await;
                }
            }
        }));

        health().sweeper.set_healthy();
        info!(partition = %self.partition, primary = self.is_primary(), "Event correlator started");
        Ok(())
    }

    /// Stops the background sweep and waits for the in-flight tick.
    pub async fn stop(&self) {
        let handle = self.sweep.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
            health().sweeper.set_unhealthy("stopped");
            info!(partition = %self.partition, "Event correlator stopped");
        }
    }

    /// Waits up to `timeout` for the aggregated result of `group_id`.
    ///
    /// A result that completed before the call is returned when it is still
    /// kept (see `max_ready_responses`). On timeout the expiry action
    /// decides: `Fail` returns `ROUTE_002`, `Forward` completes the group
    /// with the events received so far, `Discard` returns `None` and leaves
    /// the group to the sweep.
    #[instrument(skip(self))]
    pub async fn get_response(&self, group_id: &str, timeout: Duration) -> Result<Option<Event>> {
        let waiter = {
            let _guard = self.locks.acquire(group_id).await;
            if let Some(result) = self.responses.take(group_id).await {
                return Ok(Some(result));
            }
            self.responses.wait(group_id)
        };

        if let Ok(Ok(result)) = tokio::time::timeout(timeout, waiter).await {
            return Ok(Some(result));
        }

        self.responses.forget_closed(group_id);
        // published between the timeout and forgetting the waiter
        if let Some(result) = self.responses.take(group_id).await {
            return Ok(Some(result));
        }

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        match self.config.expiry_action {
            ExpiryAction::Fail => {
                self.listeners.notify(CorrelationNotification::ResponseTimeout {
                    group_id: group_id.to_string(),
                    timeout_ms,
                });
                Err(Error::routing(
                    RoutingErrorCode::CorrelationTimeout,
                    format!("no result for group '{}' within {} ms", group_id, timeout_ms),
                ))
            }
            ExpiryAction::Forward => self.force_group_expiry(group_id).await,
            ExpiryAction::Discard => Ok(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweep.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Marks this node as the one running expiry.
    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
        info!(partition = %self.partition, primary = primary, "Primary flag changed");
    }

    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }
}
