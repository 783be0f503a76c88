//! Outbound dashboard events
//!
//! What rendering code subscribes to. Delivered over a tokio broadcast
//! channel; a lagging subscriber loses old events, never blocks the
//! scheduler.

use std::sync::Arc;

use crate::aggregator::DomainMetrics;
use crate::connection::ConnectionState;
use crate::map::ReconcileReport;
use crate::model::{Domain, Sample, Snapshot};
use crate::timeseries::SeriesKey;

#[derive(Debug, Clone)]
pub enum DashboardEvent {
    /// A new snapshot replaced the previous one
    SnapshotChanged {
        domain: Domain,
        metrics: DomainMetrics,
        snapshot: Arc<Snapshot>,
    },
    /// A chart series changed; `samples` is the full ordered series
    SeriesUpdated { key: SeriesKey, samples: Vec<Sample> },
    /// A map overlay was brought in line with its snapshot
    OverlayReconciled {
        domain: Domain,
        report: ReconcileReport,
    },
    /// A refresh failed; the last snapshot stays on screen
    RefreshFailed { domain: Domain, error: String },
    ConnectionChanged(ConnectionState),
}

impl DashboardEvent {
    /// Domain the event is about, if any
    pub fn domain(&self) -> Option<Domain> {
        match self {
            DashboardEvent::SnapshotChanged { domain, .. }
            | DashboardEvent::OverlayReconciled { domain, .. }
            | DashboardEvent::RefreshFailed { domain, .. } => Some(*domain),
            DashboardEvent::SeriesUpdated { key, .. } => Some(key.domain),
            DashboardEvent::ConnectionChanged(_) => None,
        }
    }
}
