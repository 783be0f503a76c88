//! Data Aggregation
//!
//! Fetches domain snapshots and entity histories from the campus backend and
//! computes the figures the dashboard displays.
//!
//! ## Architecture
//!
//! - **SnapshotSource**: the backend seam; [`HttpBackend`] talks to the REST
//!   API with reqwest
//! - **DataAggregator**: decodes responses into [`Snapshot`]s and
//!   [`EntityHistory`]s
//! - **Metrics**: pure derived figures (totals, rates, counts) per domain
//!
//! A fetch either yields a complete snapshot or a [`FetchError`]; it is
//! never partially applied.
//!
//! [`Snapshot`]: crate::model::Snapshot

mod client;
mod engine;
mod error;
mod metrics;

pub use client::{HttpBackend, SnapshotSource};
pub use engine::{decode_history, decode_snapshot, DataAggregator, EntityHistory};
pub use error::FetchError;
pub use metrics::{
    building_occupancy, fill_rate, metric_value, occupancy_rate, summarize, tracked_metrics,
    BuildingOccupancy, BuildingsSummary, BusSummary, DomainMetrics, LotOccupancy, OccupancyLevel,
    ParkingSummary, StationReading, TaxiSummary, WeatherSummary, WifiSummary,
};
