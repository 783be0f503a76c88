//! Marker layers
//!
//! The map widget seam. A layer holds the markers of one overlay; the map
//! renderer redraws it when told to.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::GeoPoint;

/// One marker on a map overlay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// Entity id the marker stands for
    pub id: String,
    pub position: GeoPoint,
    /// Icon name understood by the renderer
    pub icon: String,
    /// Popup heading
    pub title: String,
    /// Popup body, one line per entry
    pub details: Vec<String>,
}

/// A map overlay that markers can be placed on
pub trait MarkerLayer: Send {
    /// Remove every marker
    fn clear(&mut self);

    /// Add a marker, replacing any marker with the same id
    fn upsert(&mut self, marker: Marker);

    /// Remove one marker; returns whether it existed
    fn remove(&mut self, id: &str) -> bool;

    fn marker(&self, id: &str) -> Option<&Marker>;

    /// Ids of the markers currently shown
    fn marker_ids(&self) -> Vec<String>;

    /// Called once after a batch of changes
    fn redraw(&mut self) {}
}

/// Layer kept in memory, for headless runs and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryLayer {
    markers: BTreeMap<String, Marker>,
    stats: LayerStats,
}

/// Counters of the operations applied to an [`InMemoryLayer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerStats {
    pub clears: usize,
    pub upserts: usize,
    pub removals: usize,
    pub redraws: usize,
}

impl InMemoryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers in id order
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn stats(&self) -> LayerStats {
        self.stats
    }
}

impl MarkerLayer for InMemoryLayer {
    fn clear(&mut self) {
        self.markers.clear();
        self.stats.clears += 1;
    }

    fn upsert(&mut self, marker: Marker) {
        self.markers.insert(marker.id.clone(), marker);
        self.stats.upserts += 1;
    }

    fn remove(&mut self, id: &str) -> bool {
        let removed = self.markers.remove(id).is_some();
        if removed {
            self.stats.removals += 1;
        }
        removed
    }

    fn marker(&self, id: &str) -> Option<&Marker> {
        self.markers.get(id)
    }

    fn marker_ids(&self) -> Vec<String> {
        self.markers.keys().cloned().collect()
    }

    fn redraw(&mut self) {
        self.stats.redraws += 1;
    }
}
