//! Update Scheduler
//!
//! Decides when each domain is refreshed. Poll ticks, push events, section
//! changes and manual refreshes are messages into one loop; the loop feeds
//! them to [`RefreshState`], spawns the fetches it asks for and applies
//! their results to the [`Projection`] in completion order.
//!
//! The snapshot request and each history request are bounded by
//! `fetch_timeout`, so a hung backend call can never keep a domain in
//! flight forever.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::events::DashboardEvent;
use super::pipeline::{self, Projection, RefreshOutcome};
use super::state::{Decision, RefreshState};
use crate::aggregator::{DataAggregator, FetchError};
use crate::config::SchedulerConfig;
use crate::connection::{ConnectionManager, SubscriptionId};
use crate::model::{Domain, Section};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    #[error("Scheduler stopped")]
    Stopped,

    #[error("Scheduler task failed: {0}")]
    Task(String),
}

/// Snapshot of the scheduler's bookkeeping, published after every change
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_section: Section,
    pub in_flight: Vec<Domain>,
    pub pending: Vec<Domain>,
    pub stale: Vec<Domain>,
    pub last_success: BTreeMap<Domain, DateTime<Utc>>,
    pub last_error: BTreeMap<Domain, String>,
    pub ticks: u64,
    /// Fetches started per domain
    pub fetches: BTreeMap<Domain, u64>,
    /// Triggers folded into an in-flight fetch
    pub coalesced: u64,
}

impl SchedulerStatus {
    pub fn is_in_flight(&self, domain: Domain) -> bool {
        self.in_flight.contains(&domain)
    }

    pub fn fetch_count(&self, domain: Domain) -> u64 {
        self.fetches.get(&domain).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Push(Domain),
    SetSection(Section),
    RefreshAll,
    Stop,
}

struct Completion {
    domain: Domain,
    result: Result<RefreshOutcome, FetchError>,
}

/// Owns the refresh loop and its lifecycle
///
/// Commands sent before [`start`](Self::start) are queued and handled once
/// the loop runs.
pub struct UpdateScheduler {
    config: SchedulerConfig,
    aggregator: DataAggregator,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: Option<mpsc::UnboundedReceiver<Command>>,
    projection: Option<Projection>,
    events: broadcast::Sender<DashboardEvent>,
    status_tx: watch::Sender<SchedulerStatus>,
    task: Option<JoinHandle<Projection>>,
    forwarders: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl UpdateScheduler {
    pub fn new(config: SchedulerConfig, aggregator: DataAggregator, projection: Projection) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SchedulerStatus {
            active_section: config.initial_section,
            ..Default::default()
        });
        let events = projection.event_sender();

        Self {
            config,
            aggregator,
            command_tx,
            command_rx: Some(command_rx),
            projection: Some(projection),
            events,
            status_tx,
            task: None,
            forwarders: Vec::new(),
            stopped: false,
        }
    }

    /// Subscribe to dashboard events
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Watch the scheduler status
    pub fn watch_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status_tx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start the refresh loop; the first tick refreshes every domain
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.stopped {
            return Err(SchedulerError::Stopped);
        }
        if self.task.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        let (Some(commands), Some(projection)) = (self.command_rx.take(), self.projection.take())
        else {
            return Err(SchedulerError::Stopped);
        };

        let (completion_tx, completions) = mpsc::unbounded_channel();
        let worker = Worker {
            aggregator: self.aggregator.clone(),
            state: RefreshState::new(self.config.initial_section, self.config.defer_inactive_push),
            projection,
            status: self.status_tx.borrow().clone(),
            status_tx: self.status_tx.clone(),
            completion_tx,
            poll_interval: self.config.poll_interval(),
            fetch_timeout: self.config.fetch_timeout(),
        };

        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            fetch_timeout_secs = self.config.fetch_timeout_secs,
            section = %self.config.initial_section,
            "Update scheduler started"
        );
        self.task = Some(tokio::spawn(worker.run(commands, completions)));
        Ok(())
    }

    /// Stop the loop and hand back the projection
    ///
    /// Fetches still in flight finish in the background; their results are
    /// dropped.
    pub async fn stop(&mut self) -> Result<Projection, SchedulerError> {
        if self.stopped {
            return Err(SchedulerError::Stopped);
        }
        let task = self.task.take().ok_or(SchedulerError::NotRunning)?;
        self.stopped = true;

        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        let _ = self.command_tx.send(Command::Stop);

        let projection = task
            .await
            .map_err(|e| SchedulerError::Task(e.to_string()))?;
        tracing::info!("Update scheduler stopped");
        Ok(projection)
    }

    /// A push event announced new data for `domain`
    pub fn push(&self, domain: Domain) -> Result<(), SchedulerError> {
        self.send(Command::Push(domain))
    }

    /// The operator navigated to `section`
    pub fn set_section(&self, section: Section) -> Result<(), SchedulerError> {
        self.send(Command::SetSection(section))
    }

    /// Refresh every domain now, without resetting the poll timer
    pub fn refresh_all(&self) -> Result<(), SchedulerError> {
        self.send(Command::RefreshAll)
    }

    /// Route push events and connection state changes of `manager` here
    pub async fn attach(&mut self, manager: &ConnectionManager) -> Vec<SubscriptionId> {
        let mut ids = Vec::with_capacity(Domain::all().len());
        for domain in Domain::all() {
            let commands = self.command_tx.clone();
            let id = manager
                .subscribe(*domain, move |event| {
                    // the payload is not trusted; only the domain matters
                    let _ = commands.send(Command::Push(event.domain));
                })
                .await;
            ids.push(id);
        }

        let mut state_rx = manager.watch_state();
        let events = self.events.clone();
        self.forwarders.push(tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                let _ = events.send(DashboardEvent::ConnectionChanged(state));
            }
        }));

        ids
    }

    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        if self.stopped {
            return Err(SchedulerError::Stopped);
        }
        self.command_tx
            .send(command)
            .map_err(|_| SchedulerError::Stopped)
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

/// State owned by the spawned loop
struct Worker {
    aggregator: DataAggregator,
    state: RefreshState,
    projection: Projection,
    status: SchedulerStatus,
    status_tx: watch::Sender<SchedulerStatus>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    poll_interval: Duration,
    fetch_timeout: Duration,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) -> Projection {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.status.running = true;
        self.publish_status();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.status.ticks += 1;
                    let decision = self.state.on_tick();
                    tracing::debug!(tick = self.status.ticks, started = decision.start.len(), "Poll tick");
                    self.launch(decision);
                }
                Some(completion) = completions.recv() => self.complete(completion),
                command = commands.recv() => match command {
                    Some(Command::Push(domain)) => {
                        let decision = self.state.on_push(domain);
                        if decision.start.is_empty() && decision.coalesced == 0 {
                            tracing::debug!(domain = %domain, "Push deferred, domain marked stale");
                        }
                        self.launch(decision);
                    }
                    Some(Command::SetSection(section)) => {
                        tracing::debug!(section = %section, "Active section changed");
                        let decision = self.state.on_section_change(section);
                        self.launch(decision);
                    }
                    Some(Command::RefreshAll) => {
                        let decision = self.state.on_tick();
                        self.launch(decision);
                    }
                    Some(Command::Stop) | None => break,
                },
            }
        }

        self.status.running = false;
        self.publish_status();
        self.projection
    }

    fn launch(&mut self, decision: Decision) {
        self.status.coalesced += decision.coalesced as u64;

        for domain in decision.start {
            *self.status.fetches.entry(domain).or_default() += 1;

            let aggregator = self.aggregator.clone();
            let bootstrapped = self.projection.bootstrapped_ids(domain);
            let completions = self.completion_tx.clone();
            let timeout = self.fetch_timeout;

            tokio::spawn(async move {
                let result = pipeline::fetch(&aggregator, domain, &bootstrapped, timeout).await;
                // the loop is gone after stop; nothing left to apply to
                let _ = completions.send(Completion { domain, result });
            });
        }

        self.publish_status();
    }

    fn complete(&mut self, completion: Completion) {
        let domain = completion.domain;

        match completion.result {
            Ok(outcome) => {
                let report = self.projection.apply(outcome);
                tracing::debug!(
                    domain = %domain,
                    entities = report.entities,
                    series = report.series_updated,
                    histories = report.histories_loaded,
                    "Refresh applied"
                );
                self.status.last_success.insert(domain, Utc::now());
                self.status.last_error.remove(&domain);
            }
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "Refresh failed");
                self.projection.fail(domain, &e);
                self.status.last_error.insert(domain, e.to_string());
            }
        }

        let decision = self.state.on_complete(domain);
        self.launch(decision);
    }

    fn publish_status(&mut self) {
        self.status.active_section = self.state.active_section();
        self.status.in_flight = self.state.in_flight().collect();
        self.status.pending = self.state.pending().collect();
        self.status.stale = self.state.stale().collect();
        self.status_tx.send_replace(self.status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SnapshotSource;
    use crate::connection::PushEvent;
    use crate::map::{InMemoryLayer, MapLayerSync, ReconcilePolicy};
    use crate::timeseries::TimeSeriesStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Backend double: counts calls, fails on demand and can hold parking
    /// fetches until the test releases them
    #[derive(Default)]
    struct FakeSource {
        calls: Mutex<HashMap<Domain, usize>>,
        failures: Mutex<HashMap<Domain, usize>>,
        parking_gate: Option<Arc<Semaphore>>,
        parking_active: AtomicUsize,
        parking_max_active: AtomicUsize,
        history_hangs: bool,
    }

    impl FakeSource {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                parking_gate: Some(gate),
                ..Default::default()
            }
        }

        fn failing(domain: Domain, times: usize) -> Self {
            let source = Self::default();
            source.failures.lock().unwrap().insert(domain, times);
            source
        }

        fn calls(&self, domain: Domain) -> usize {
            self.calls.lock().unwrap().get(&domain).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSource {
        async fn fetch_snapshot(&self, domain: Domain) -> Result<Value, FetchError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(domain).or_default();
                *count += 1;
                *count
            };

            if domain == Domain::Parking {
                let active = self.parking_active.fetch_add(1, Ordering::SeqCst) + 1;
                self.parking_max_active.fetch_max(active, Ordering::SeqCst);
                if let Some(gate) = &self.parking_gate {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
                self.parking_active.fetch_sub(1, Ordering::SeqCst);
            }

            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(&domain) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(FetchError::Unavailable(format!("{} down", domain)));
                    }
                }
            }

            Ok(match domain {
                Domain::Parking => json!({
                    "P1": {"capacite_totale": 100, "places_disponibles": call}
                }),
                _ => json!({}),
            })
        }

        async fn fetch_entity(&self, _domain: Domain, id: &str) -> Result<Value, FetchError> {
            Err(FetchError::NotFound(id.to_string()))
        }

        async fn fetch_history(&self, _domain: Domain, _id: &str) -> Result<Value, FetchError> {
            if self.history_hangs {
                std::future::pending::<()>().await;
            }
            Ok(json!([]))
        }
    }

    fn scheduler(source: Arc<FakeSource>, config: SchedulerConfig) -> UpdateScheduler {
        let (events, _) = broadcast::channel(256);
        let map = MapLayerSync::transport(
            ReconcilePolicy::Rebuild,
            Box::new(InMemoryLayer::new()),
            Box::new(InMemoryLayer::new()),
        );
        let projection = Projection::new(TimeSeriesStore::new(100), map, events);
        UpdateScheduler::new(config, DataAggregator::new(source), projection)
    }

    fn config(poll_secs: u64, timeout_secs: u64, section: Section) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_secs: poll_secs,
            fetch_timeout_secs: timeout_secs,
            initial_section: section,
            defer_inactive_push: false,
        }
    }

    async fn wait_until<F>(rx: &mut watch::Receiver<SchedulerStatus>, limit: Duration, condition: F)
    where
        F: FnMut(&SchedulerStatus) -> bool,
    {
        tokio::time::timeout(limit, rx.wait_for(condition))
            .await
            .expect("condition not reached in time")
            .expect("status channel closed");
    }

    const REAL: Duration = Duration::from_secs(5);

    /// Every domain fetched once and nothing in flight
    fn settled(status: &SchedulerStatus) -> bool {
        status.in_flight.is_empty()
            && Domain::all().iter().all(|d| status.fetch_count(*d) >= 1)
    }

    #[tokio::test]
    async fn test_push_burst_coalesces_into_one_follow_up() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(FakeSource::gated(gate.clone()));
        let mut scheduler = scheduler(source.clone(), config(3600, 3600, Section::Parking));
        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();

        // first tick: everything but parking completes
        wait_until(&mut status, REAL, |s| s.in_flight == vec![Domain::Parking]).await;

        for _ in 0..5 {
            scheduler.push(Domain::Parking).unwrap();
        }
        wait_until(&mut status, REAL, |s| s.coalesced == 5).await;
        assert_eq!(scheduler.status().pending, vec![Domain::Parking]);

        gate.add_permits(10);
        wait_until(&mut status, REAL, |s| {
            s.fetch_count(Domain::Parking) == 2 && s.in_flight.is_empty()
        })
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(Domain::Parking), 2);
        assert_eq!(source.parking_max_active.load(Ordering::SeqCst), 1);

        let projection = scheduler.stop().await.unwrap();
        let snapshot = projection.snapshot(Domain::Parking).unwrap();
        assert_eq!(
            snapshot.get("P1").and_then(|e| e.number("places_disponibles")),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_section_switch_refreshes_new_section() {
        let source = Arc::new(FakeSource::default());
        let mut scheduler = scheduler(source.clone(), config(3600, 3600, Section::Parking));
        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();
        wait_until(&mut status, REAL, settled).await;

        scheduler.set_section(Section::Wifi).unwrap();
        wait_until(&mut status, REAL, |s| {
            s.fetch_count(Domain::Wifi) == 2 && s.in_flight.is_empty()
        })
        .await;

        let current = scheduler.status();
        assert_eq!(current.active_section, Section::Wifi);
        assert_eq!(current.fetch_count(Domain::Parking), 1);
        assert_eq!(current.ticks, 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_deferred_push_waits_for_section() {
        let source = Arc::new(FakeSource::default());
        let mut cfg = config(3600, 3600, Section::Parking);
        cfg.defer_inactive_push = true;
        let mut scheduler = scheduler(source.clone(), cfg);
        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();
        wait_until(&mut status, REAL, settled).await;

        scheduler.push(Domain::Weather).unwrap();
        scheduler.push(Domain::Parking).unwrap();
        wait_until(&mut status, REAL, |s| {
            s.fetch_count(Domain::Parking) == 2 && s.in_flight.is_empty()
        })
        .await;
        let current = scheduler.status();
        assert_eq!(current.stale, vec![Domain::Weather]);
        assert_eq!(current.fetch_count(Domain::Weather), 1);

        scheduler.set_section(Section::Weather).unwrap();
        wait_until(&mut status, REAL, |s| {
            s.fetch_count(Domain::Weather) == 2 && s.stale.is_empty()
        })
        .await;
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_all_and_attached_push() {
        let source = Arc::new(FakeSource::default());
        let manager = ConnectionManager::new();
        let mut scheduler = scheduler(source.clone(), config(3600, 3600, Section::Overview));
        let ids = scheduler.attach(&manager).await;
        assert_eq!(ids.len(), Domain::all().len());
        assert_eq!(manager.subscription_count(Domain::Wifi).await, 1);

        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();
        wait_until(&mut status, REAL, settled).await;

        let event = PushEvent::from_raw("update_wifi", json!({"id": "AP001"}), 0).unwrap();
        assert_eq!(manager.dispatch(&event).await, 1);
        wait_until(&mut status, REAL, |s| {
            s.fetch_count(Domain::Wifi) == 2 && s.in_flight.is_empty()
        })
        .await;

        scheduler.refresh_all().unwrap();
        wait_until(&mut status, REAL, |s| {
            s.fetch_count(Domain::Parking) == 2 && s.in_flight.is_empty()
        })
        .await;
        assert_eq!(scheduler.status().fetch_count(Domain::Wifi), 3);
        assert_eq!(scheduler.status().ticks, 1);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_on_third_tick() {
        let source = Arc::new(FakeSource::failing(Domain::Parking, 2));
        let mut scheduler = scheduler(source.clone(), config(30, 15, Section::Parking));
        let mut events = scheduler.subscribe();
        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();

        let limit = Duration::from_secs(600);
        for attempt in 1..=2 {
            wait_until(&mut status, limit, |s| {
                s.fetch_count(Domain::Parking) == attempt
                    && !s.is_in_flight(Domain::Parking)
                    && s.last_error.contains_key(&Domain::Parking)
            })
            .await;
            assert!(!scheduler.status().last_success.contains_key(&Domain::Parking));
        }

        wait_until(&mut status, limit, |s| {
            s.fetch_count(Domain::Parking) == 3 && !s.is_in_flight(Domain::Parking)
        })
        .await;
        let current = scheduler.status();
        assert_eq!(current.ticks, 3);
        assert!(current.last_success.contains_key(&Domain::Parking));
        assert!(!current.last_error.contains_key(&Domain::Parking));

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if let DashboardEvent::RefreshFailed { domain, .. } = event {
                assert_eq!(domain, Domain::Parking);
                failures += 1;
            }
        }
        assert_eq!(failures, 2);

        let projection = scheduler.stop().await.unwrap();
        let snapshot = projection.snapshot(Domain::Parking).unwrap();
        assert_eq!(
            snapshot.get("P1").and_then(|e| e.number("places_disponibles")),
            Some(3.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_is_released_by_timeout() {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(FakeSource::gated(gate));
        let mut scheduler = scheduler(source.clone(), config(3600, 5, Section::Parking));
        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();

        let limit = Duration::from_secs(60);
        wait_until(&mut status, limit, |s| {
            !s.is_in_flight(Domain::Parking) && s.last_error.contains_key(&Domain::Parking)
        })
        .await;
        assert!(scheduler.status().last_error[&Domain::Parking].contains("Timed out"));

        // released, so a push starts a new fetch instead of coalescing
        scheduler.push(Domain::Parking).unwrap();
        wait_until(&mut status, limit, |s| s.fetch_count(Domain::Parking) == 2).await;
        assert_eq!(scheduler.status().coalesced, 0);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_history_still_applies_snapshot() {
        let source = Arc::new(FakeSource {
            history_hangs: true,
            ..Default::default()
        });
        let mut scheduler = scheduler(source.clone(), config(3600, 5, Section::Parking));
        let mut status = scheduler.watch_status();
        scheduler.start().unwrap();

        wait_until(&mut status, Duration::from_secs(60), |s| {
            s.last_success.contains_key(&Domain::Parking) && !s.is_in_flight(Domain::Parking)
        })
        .await;
        assert!(!scheduler.status().last_error.contains_key(&Domain::Parking));

        let projection = scheduler.stop().await.unwrap();
        let snapshot = projection.snapshot(Domain::Parking).unwrap();
        assert_eq!(snapshot.len(), 1);
        // the history is retried on the next refresh
        assert!(projection.bootstrapped_ids(Domain::Parking).is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let mut scheduler = scheduler(
            Arc::new(FakeSource::default()),
            config(3600, 3600, Section::Overview),
        );
        assert_eq!(scheduler.stop().await.err(), Some(SchedulerError::NotRunning));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.start().unwrap_err(), SchedulerError::AlreadyRunning);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.status().running);
        assert_eq!(scheduler.stop().await.err(), Some(SchedulerError::Stopped));
        assert_eq!(scheduler.start().unwrap_err(), SchedulerError::Stopped);
        assert_eq!(scheduler.push(Domain::Wifi).unwrap_err(), SchedulerError::Stopped);
    }
}
