//! # Campus Pulse
//!
//! Realtime synchronization layer for a campus IoT monitoring dashboard:
//! keeps domain snapshots, chart series and map overlays current from a
//! polled REST backend and a best-effort push channel.
//!
//! ## Features
//!
//! - **Push plus polling**: Socket.IO notifications cut latency, the poll
//!   timer guarantees eventual freshness
//! - **Coalesced refreshes**: at most one fetch per domain in flight
//! - **Bounded chart history**: ordered ring buffers per entity and metric
//! - **Map reconciliation**: one marker per qualifying bus or taxi
//!
//! ## Modules
//!
//! - [`model`]: domains, sections, entities, snapshots, samples
//! - [`connection`]: push channel and subscriptions
//! - [`aggregator`]: backend client and derived metrics
//! - [`timeseries`]: chart series storage
//! - [`map`]: marker layers and overlay reconciliation
//! - [`sync`]: the update scheduler and refresh pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use campus_pulse::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     let backend = HttpBackend::new(&config.backend)?;
//!     let aggregator = DataAggregator::new(Arc::new(backend));
//!
//!     let (events, _) = tokio::sync::broadcast::channel(1024);
//!     let map = MapLayerSync::transport(
//!         ReconcilePolicy::Rebuild,
//!         Box::new(InMemoryLayer::new()),
//!         Box::new(InMemoryLayer::new()),
//!     );
//!     let projection = Projection::new(TimeSeriesStore::from_config(&config.history), map, events);
//!
//!     let mut scheduler = UpdateScheduler::new(config.scheduler.clone(), aggregator, projection);
//!     let mut updates = scheduler.subscribe();
//!     scheduler.start()?;
//!
//!     while let Ok(event) = updates.recv().await {
//!         if let DashboardEvent::SnapshotChanged { domain, metrics, .. } = event {
//!             println!("{}: {:?}", domain, metrics);
//!         }
//!     }
//!
//!     scheduler.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod connection;
pub mod map;
pub mod model;
pub mod sync;
pub mod timeseries;

// Re-export top-level types for convenience
pub use model::{Domain, Entity, GeoPoint, MalformedEntityError, Sample, Section, Snapshot};

pub use aggregator::{
    summarize, DataAggregator, DomainMetrics, EntityHistory, FetchError, HttpBackend,
    SnapshotSource,
};

pub use connection::{
    ConnectionManager, ConnectionState, PushChannel, PushEvent, SocketIoChannel, TransportError,
};

pub use timeseries::{SeriesKey, TimeSeries, TimeSeriesStore};

pub use map::{InMemoryLayer, MapLayerSync, Marker, MarkerLayer, ReconcilePolicy, ReconcileReport};

pub use sync::{
    DashboardEvent, Projection, SchedulerError, SchedulerStatus, UpdateScheduler,
};

pub use config::{generate_default_config, Config, ConfigError};
