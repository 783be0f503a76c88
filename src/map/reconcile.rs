//! Overlay reconciliation
//!
//! Brings a layer's marker set in line with the latest snapshot: exactly one
//! marker per qualifying entity, nothing else. Malformed entities are skipped
//! without affecting their siblings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::layer::{Marker, MarkerLayer};
use crate::model::{Domain, Entity, MalformedEntityError, Snapshot};

/// How a reconcile call updates the layer
///
/// `Rebuild` clears the layer and re-adds every marker. It briefly flashes
/// on screen but cannot leave a stale marker behind. `Diff` touches only
/// the markers that changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePolicy {
    #[default]
    Rebuild,
    Diff,
}

/// Outcome of one reconcile call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Markers on the layer afterwards
    pub rendered: usize,
    /// Entities rejected by the qualification predicate
    pub filtered: usize,
    /// Entities the marker factory could not place
    pub skipped: usize,
    /// Markers added or changed
    pub upserted: usize,
    /// Markers taken off the layer (all of them under `Rebuild`)
    pub removed: usize,
}

/// Decides whether an entity gets a marker
pub type Qualifier = Box<dyn Fn(&Entity) -> bool + Send + Sync>;

/// Builds the marker of one entity
pub type MarkerFactory = Box<dyn Fn(&Entity) -> Result<Marker, MalformedEntityError> + Send + Sync>;

/// Reconcile `layer` against `entities`
pub fn reconcile<'a, L>(
    layer: &mut L,
    entities: impl IntoIterator<Item = &'a Entity>,
    qualifies: &dyn Fn(&Entity) -> bool,
    factory: &dyn Fn(&Entity) -> Result<Marker, MalformedEntityError>,
    policy: ReconcilePolicy,
) -> ReconcileReport
where
    L: MarkerLayer + ?Sized,
{
    let mut report = ReconcileReport::default();
    let mut wanted: BTreeMap<String, Marker> = BTreeMap::new();

    for entity in entities {
        if !qualifies(entity) {
            report.filtered += 1;
            continue;
        }
        match factory(entity) {
            Ok(marker) => {
                wanted.insert(marker.id.clone(), marker);
            }
            Err(e) => {
                tracing::debug!(entity_id = %entity.id, error = %e, "Skipping marker");
                report.skipped += 1;
            }
        }
    }

    match policy {
        ReconcilePolicy::Rebuild => {
            report.removed = layer.marker_ids().len();
            layer.clear();
            report.upserted = wanted.len();
            for marker in wanted.into_values() {
                layer.upsert(marker);
            }
        }
        ReconcilePolicy::Diff => {
            for id in layer.marker_ids() {
                if !wanted.contains_key(&id) && layer.remove(&id) {
                    report.removed += 1;
                }
            }
            for (id, marker) in wanted {
                if layer.marker(&id) != Some(&marker) {
                    layer.upsert(marker);
                    report.upserted += 1;
                }
            }
        }
    }

    report.rendered = layer.marker_ids().len();
    layer.redraw();
    report
}

/// One domain's overlay: its layer plus the rules to fill it
pub struct Overlay {
    layer: Box<dyn MarkerLayer>,
    qualifies: Qualifier,
    factory: MarkerFactory,
}

impl Overlay {
    pub fn new(layer: Box<dyn MarkerLayer>, qualifies: Qualifier, factory: MarkerFactory) -> Self {
        Self {
            layer,
            qualifies,
            factory,
        }
    }

    pub fn layer(&self) -> &dyn MarkerLayer {
        self.layer.as_ref()
    }
}

/// Owns the map overlays of the dashboard
pub struct MapLayerSync {
    overlays: HashMap<Domain, Overlay>,
    policy: ReconcilePolicy,
}

impl MapLayerSync {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            overlays: HashMap::new(),
            policy,
        }
    }

    /// Attach an overlay for `domain`, replacing any previous one
    pub fn add_overlay(&mut self, domain: Domain, overlay: Overlay) {
        self.overlays.insert(domain, overlay);
    }

    pub fn with_overlay(mut self, domain: Domain, overlay: Overlay) -> Self {
        self.add_overlay(domain, overlay);
        self
    }

    pub fn handles(&self, domain: Domain) -> bool {
        self.overlays.contains_key(&domain)
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ReconcilePolicy) {
        self.policy = policy;
    }

    pub fn layer(&self, domain: Domain) -> Option<&dyn MarkerLayer> {
        self.overlays.get(&domain).map(Overlay::layer)
    }

    /// Reconcile the overlay of the snapshot's domain, if there is one
    pub fn sync(&mut self, snapshot: &Snapshot) -> Option<ReconcileReport> {
        let policy = self.policy;
        let overlay = self.overlays.get_mut(&snapshot.domain)?;

        let report = reconcile(
            overlay.layer.as_mut(),
            snapshot.iter(),
            overlay.qualifies.as_ref(),
            overlay.factory.as_ref(),
            policy,
        );

        tracing::debug!(
            domain = %snapshot.domain,
            rendered = report.rendered,
            skipped = report.skipped,
            "Overlay reconciled"
        );
        Some(report)
    }
}

impl Default for MapLayerSync {
    fn default() -> Self {
        Self::new(ReconcilePolicy::default())
    }
}
