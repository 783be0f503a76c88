//! Refresh pipeline
//!
//! One path for every domain: fetch (snapshot plus history bootstrap for
//! entities seen for the first time), then apply the result to the local
//! projection (chart series, map overlays, card metrics) and publish what
//! changed. Fetching happens off the scheduler loop; applying happens on it,
//! one outcome at a time.

use futures_util::future::join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::events::DashboardEvent;
use crate::aggregator::{
    metric_value, summarize, tracked_metrics, DataAggregator, DomainMetrics, EntityHistory,
    FetchError,
};
use crate::map::MapLayerSync;
use crate::model::{Domain, Sample, Snapshot};
use crate::timeseries::{SeriesKey, TimeSeriesStore};

/// Everything one refresh fetched
#[derive(Debug)]
pub struct RefreshOutcome {
    pub snapshot: Snapshot,
    /// Histories of entities that were not bootstrapped yet
    pub histories: Vec<EntityHistory>,
    /// Entities whose history fetch failed; retried next refresh
    pub history_failures: Vec<String>,
}

impl RefreshOutcome {
    pub fn domain(&self) -> Domain {
        self.snapshot.domain
    }
}

/// Fetch phase of one refresh
///
/// Only the snapshot fetch can fail the refresh. History fetches are
/// best-effort: each runs under its own `timeout`, and one that fails or
/// expires is reported in `history_failures` while the snapshot is kept.
pub async fn fetch(
    aggregator: &DataAggregator,
    domain: Domain,
    bootstrapped: &HashSet<String>,
    timeout: Duration,
) -> Result<RefreshOutcome, FetchError> {
    let snapshot = tokio::time::timeout(timeout, aggregator.fetch_snapshot(domain))
        .await
        .map_err(|_| {
            FetchError::Timeout(format!("{} snapshot exceeded {}s", domain, timeout.as_secs()))
        })??;

    let needs_history: Vec<String> = if domain.has_history() && !tracked_metrics(domain).is_empty() {
        snapshot
            .ids()
            .filter(|id| !bootstrapped.contains(*id))
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let results = join_all(needs_history.iter().map(|id| async move {
        tokio::time::timeout(timeout, aggregator.fetch_history(domain, id))
            .await
            .map_err(|_| {
                FetchError::Timeout(format!(
                    "{} history of {} exceeded {}s",
                    domain,
                    id,
                    timeout.as_secs()
                ))
            })?
    }))
    .await;

    let mut histories = Vec::new();
    let mut history_failures = Vec::new();
    for (id, result) in needs_history.into_iter().zip(results) {
        match result {
            Ok(history) => histories.push(history),
            Err(e) => {
                tracing::warn!(domain = %domain, entity_id = %id, error = %e, "History fetch failed");
                history_failures.push(id);
            }
        }
    }

    Ok(RefreshOutcome {
        snapshot,
        histories,
        history_failures,
    })
}

/// Summary of one apply step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub entities: usize,
    pub series_updated: usize,
    pub histories_loaded: usize,
    pub series_dropped: usize,
}

/// Local view of the campus, owned by the scheduler loop
pub struct Projection {
    store: TimeSeriesStore,
    map: MapLayerSync,
    snapshots: HashMap<Domain, Arc<Snapshot>>,
    metrics: HashMap<Domain, DomainMetrics>,
    /// Entities whose history has been loaded
    bootstrapped: HashMap<Domain, HashSet<String>>,
    events: broadcast::Sender<DashboardEvent>,
}

impl Projection {
    pub fn new(
        store: TimeSeriesStore,
        map: MapLayerSync,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Self {
        Self {
            store,
            map,
            snapshots: HashMap::new(),
            metrics: HashMap::new(),
            bootstrapped: HashMap::new(),
            events,
        }
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn map(&self) -> &MapLayerSync {
        &self.map
    }

    /// Latest snapshot of `domain`
    pub fn snapshot(&self, domain: Domain) -> Option<&Arc<Snapshot>> {
        self.snapshots.get(&domain)
    }

    pub fn metrics(&self, domain: Domain) -> Option<&DomainMetrics> {
        self.metrics.get(&domain)
    }

    /// Ids of entities of `domain` whose history is already loaded
    pub fn bootstrapped_ids(&self, domain: Domain) -> HashSet<String> {
        self.bootstrapped.get(&domain).cloned().unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<DashboardEvent> {
        self.events.clone()
    }

    /// Apply a successful refresh
    pub fn apply(&mut self, outcome: RefreshOutcome) -> ApplyReport {
        let domain = outcome.domain();
        let snapshot = Arc::new(outcome.snapshot);
        let metrics = tracked_metrics(domain);
        let mut report = ApplyReport {
            entities: snapshot.len(),
            ..Default::default()
        };
        let mut touched: BTreeSet<SeriesKey> = BTreeSet::new();

        // fetched history is authoritative, load it before today's sample
        for history in &outcome.histories {
            for metric in metrics {
                self.store.replace_history(
                    domain,
                    &history.entity_id,
                    metric,
                    history.samples(metric).iter().copied(),
                );
                touched.insert(SeriesKey::new(domain, history.entity_id.as_str(), *metric));
            }
            self.bootstrapped
                .entry(domain)
                .or_default()
                .insert(history.entity_id.clone());
            report.histories_loaded += 1;
        }

        for entity in snapshot.iter() {
            let timestamp = entity.timestamp_ms().unwrap_or(snapshot.received_at);
            for metric in metrics {
                match metric_value(domain, entity, metric) {
                    Some(value) => {
                        self.store.append(
                            domain,
                            &entity.id,
                            metric,
                            Sample::new(timestamp, value),
                        );
                        touched.insert(SeriesKey::new(domain, entity.id.as_str(), *metric));
                    }
                    None => tracing::debug!(
                        domain = %domain,
                        entity_id = %entity.id,
                        metric = %metric,
                        "No sample for metric"
                    ),
                }
            }
        }

        // entities gone from the snapshot lose their series
        let live: HashSet<&str> = snapshot.ids().collect();
        report.series_dropped = self.store.retain_entities(domain, &live);
        if let Some(ids) = self.bootstrapped.get_mut(&domain) {
            ids.retain(|id| live.contains(id.as_str()));
        }

        for key in touched {
            let samples = self.store.get_series(key.domain, &key.entity_id, &key.metric);
            report.series_updated += 1;
            self.publish(DashboardEvent::SeriesUpdated { key, samples });
        }

        let summary = summarize(&snapshot);
        if summary.skipped() > 0 {
            tracing::warn!(domain = %domain, skipped = summary.skipped(), "Malformed entities skipped");
        }
        self.metrics.insert(domain, summary.clone());
        self.publish(DashboardEvent::SnapshotChanged {
            domain,
            metrics: summary,
            snapshot: Arc::clone(&snapshot),
        });

        if let Some(overlay) = self.map.sync(&snapshot) {
            self.publish(DashboardEvent::OverlayReconciled {
                domain,
                report: overlay,
            });
        }

        self.snapshots.insert(domain, snapshot);
        report
    }

    /// Publish a failed refresh; the last snapshot stays in place
    pub fn fail(&self, domain: Domain, error: &FetchError) {
        self.publish(DashboardEvent::RefreshFailed {
            domain,
            error: error.to_string(),
        });
    }

    pub(crate) fn publish(&self, event: DashboardEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
