//! Entities, snapshots and samples
//!
//! Attributes are kept as an opaque JSON mapping. Only a handful of fields
//! are interpreted generically here: `timestamp`, `latitude`/`longitude`
//! and numeric or boolean lookups used by the derived metrics.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::domain::Domain;

/// Convert a Unix timestamp in (fractional) seconds to milliseconds
pub fn unix_seconds_to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// One monitored object (a parking lot, a bus, an access point...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, unique within its domain
    pub id: String,
    /// Domain-specific attributes as delivered by the backend
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, attributes: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    /// Raw attribute lookup
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Numeric attribute, if present and numeric
    pub fn number(&self, field: &str) -> Option<f64> {
        self.attributes.get(field).and_then(Value::as_f64)
    }

    /// Boolean attribute, if present and boolean
    pub fn flag(&self, field: &str) -> Option<bool> {
        self.attributes.get(field).and_then(Value::as_bool)
    }

    /// String attribute, if present and a string
    pub fn text(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(Value::as_str)
    }

    /// Display name (`nom`), falling back to the id
    pub fn name(&self) -> &str {
        self.text("nom").unwrap_or(&self.id)
    }

    /// Numeric attribute that a computation cannot do without
    pub fn require_number(&self, field: &str) -> Result<f64, MalformedEntityError> {
        match self.attributes.get(field) {
            None => Err(MalformedEntityError::missing(&self.id, field)),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| MalformedEntityError::invalid(&self.id, field)),
        }
    }

    /// Boolean attribute that a computation cannot do without
    pub fn require_flag(&self, field: &str) -> Result<bool, MalformedEntityError> {
        match self.attributes.get(field) {
            None => Err(MalformedEntityError::missing(&self.id, field)),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| MalformedEntityError::invalid(&self.id, field)),
        }
    }

    /// Measurement time in milliseconds, from the `timestamp` field (seconds)
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.number("timestamp").map(unix_seconds_to_millis)
    }

    /// Geographic position from `latitude` / `longitude`
    pub fn position(&self) -> Result<GeoPoint, MalformedEntityError> {
        let lat = self.require_number("latitude")?;
        let lon = self.require_number("longitude")?;
        GeoPoint::new(lat, lon)
            .ok_or_else(|| MalformedEntityError::invalid(&self.id, "latitude/longitude"))
    }
}

/// A WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

/// The complete current state of one domain, as returned by one fetch
///
/// Immutable once built; the next snapshot for the same domain replaces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub domain: Domain,
    /// Entities keyed by id, ordered for deterministic iteration
    pub entities: BTreeMap<String, Entity>,
    /// When the snapshot was received (Unix milliseconds)
    pub received_at: i64,
}

impl Snapshot {
    pub fn new(
        domain: Domain,
        entities: impl IntoIterator<Item = Entity>,
        received_at: i64,
    ) -> Self {
        Self {
            domain,
            entities: entities.into_iter().map(|e| (e.id.clone(), e)).collect(),
            received_at,
        }
    }

    /// An empty snapshot (no entities reported)
    pub fn empty(domain: Domain, received_at: i64) -> Self {
        Self {
            domain,
            entities: BTreeMap::new(),
            received_at,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Entities in id order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// One (timestamp, value) observation of a tracked metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// An entity lacks a field needed for a computation or for map placement
///
/// Always scoped to one entity: siblings in the same snapshot are still
/// processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed entity {entity_id}: {problem} field `{field}`")]
pub struct MalformedEntityError {
    pub entity_id: String,
    pub field: String,
    pub problem: FieldProblem,
}

/// What is wrong with the field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    Invalid,
}

impl std::fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldProblem::Missing => write!(f, "missing"),
            FieldProblem::Invalid => write!(f, "invalid"),
        }
    }
}

impl MalformedEntityError {
    pub fn missing(entity_id: &str, field: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            problem: FieldProblem::Missing,
        }
    }

    pub fn invalid(entity_id: &str, field: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            problem: FieldProblem::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, attrs: Value) -> Entity {
        match attrs {
            Value::Object(map) => Entity::new(id, map),
            _ => panic!("attributes must be an object"),
        }
    }

    #[test]
    fn test_seconds_to_millis() {
        assert_eq!(unix_seconds_to_millis(1_699_000_000.25), 1_699_000_000_250);
        assert_eq!(unix_seconds_to_millis(0.0), 0);
    }

    #[test]
    fn test_position() {
        let bus = entity("BUS1", json!({"latitude": 48.85, "longitude": 2.35}));
        let pos = bus.position().unwrap();
        assert_eq!(pos.lat, 48.85);
        assert_eq!(pos.lon, 2.35);
    }

    #[test]
    fn test_position_missing_longitude() {
        let bus = entity("BUS2", json!({"latitude": 48.85}));
        let err = bus.position().unwrap_err();
        assert_eq!(err.field, "longitude");
        assert_eq!(err.problem, FieldProblem::Missing);
    }

    #[test]
    fn test_position_out_of_range() {
        let bus = entity("BUS3", json!({"latitude": 148.0, "longitude": 2.0}));
        assert!(bus.position().is_err());
    }

    #[test]
    fn test_require_number_rejects_strings() {
        let lot = entity("P1", json!({"capacite_totale": "120"}));
        let err = lot.require_number("capacite_totale").unwrap_err();
        assert_eq!(err.problem, FieldProblem::Invalid);
        assert_eq!(
            err.to_string(),
            "Malformed entity P1: invalid field `capacite_totale`"
        );
    }

    #[test]
    fn test_name_falls_back_to_id() {
        let named = entity("AP001", json!({"nom": "WiFi-Cafeteria"}));
        let anonymous = entity("AP002", json!({}));
        assert_eq!(named.name(), "WiFi-Cafeteria");
        assert_eq!(anonymous.name(), "AP002");
    }

    #[test]
    fn test_snapshot_orders_by_id() {
        let snapshot = Snapshot::new(
            Domain::Parking,
            vec![
                entity("P2", json!({})),
                entity("P1", json!({})),
            ],
            1000,
        );
        let ids: Vec<&str> = snapshot.ids().collect();
        assert_eq!(ids, vec!["P1", "P2"]);
        assert_eq!(snapshot.len(), 2);
    }
}
