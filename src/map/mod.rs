//! Map Overlays
//!
//! Keeps geo-tagged entities (buses, taxis) on the map in step with the
//! latest snapshot.
//!
//! - **MarkerLayer**: the map widget seam, with an in-memory implementation
//! - **reconcile**: one marker per qualifying entity, malformed ones skipped
//! - **MapLayerSync**: per-domain overlays and the reconcile policy
//!
//! The default policy is a full clear-then-rebuild on every snapshot. The
//! `Diff` policy reaches the same final marker set while leaving unchanged
//! markers alone.

mod layer;
mod overlays;
mod reconcile;

pub use layer::{InMemoryLayer, LayerStats, Marker, MarkerLayer};
pub use overlays::{bus_in_service, bus_marker, taxi_in_motion, taxi_marker};
pub use reconcile::{
    reconcile, MapLayerSync, MarkerFactory, Overlay, Qualifier, ReconcilePolicy, ReconcileReport,
};
