//! DataAggregator - turns backend responses into snapshots and samples
//!
//! A snapshot is decoded all-or-nothing: if the body is not a collection of
//! entities the whole fetch fails and the previous snapshot stays current.
//! Inside a valid body, entries that are not objects are dropped one by one.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::client::SnapshotSource;
use super::error::FetchError;
use super::metrics::{summarize, DomainMetrics};
use crate::model::{unix_seconds_to_millis, Domain, Entity, Sample, Snapshot};

/// History of one entity, split into one sample list per numeric field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHistory {
    pub domain: Domain,
    pub entity_id: String,
    /// Metric name → samples in backend order
    pub series: BTreeMap<String, Vec<Sample>>,
    /// Records that had no usable timestamp
    pub skipped: usize,
}

impl EntityHistory {
    /// Samples of one metric, empty if the backend never reported it
    pub fn samples(&self, metric: &str) -> &[Sample] {
        self.series.get(metric).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Fetches snapshots and histories through a [`SnapshotSource`]
#[derive(Clone)]
pub struct DataAggregator {
    source: Arc<dyn SnapshotSource>,
}

impl DataAggregator {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    /// Fetch the current snapshot of `domain` (one round trip)
    pub async fn fetch_snapshot(&self, domain: Domain) -> Result<Snapshot, FetchError> {
        let body = self.source.fetch_snapshot(domain).await?;
        let received_at = chrono::Utc::now().timestamp_millis();
        decode_snapshot(domain, body, received_at)
    }

    /// Fetch one entity
    pub async fn fetch_entity(&self, domain: Domain, id: &str) -> Result<Entity, FetchError> {
        match self.source.fetch_entity(domain, id).await? {
            Value::Object(attributes) => Ok(Entity::new(id, attributes)),
            _ => Err(FetchError::decode(
                format!("{}/{}", domain.path(), id),
                "entity is not an object",
            )),
        }
    }

    /// Fetch the history of one entity
    ///
    /// The backend answers 404 for an entity that has no history yet; that
    /// is an empty history, not an error.
    pub async fn fetch_history(&self, domain: Domain, id: &str) -> Result<EntityHistory, FetchError> {
        match self.source.fetch_history(domain, id).await {
            Ok(body) => decode_history(domain, id, body),
            Err(FetchError::NotFound(url)) => {
                tracing::debug!(domain = %domain, entity_id = %id, url = %url, "No history yet");
                decode_history(domain, id, Value::Array(Vec::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Card figures of a snapshot
    pub fn summarize(&self, snapshot: &Snapshot) -> DomainMetrics {
        summarize(snapshot)
    }
}

/// Decode a snapshot body
///
/// Accepts the campus backend's `{id: attributes}` object as well as an
/// array of objects carrying an `id` field.
pub fn decode_snapshot(domain: Domain, body: Value, received_at: i64) -> Result<Snapshot, FetchError> {
    let mut entities = Vec::new();

    match body {
        Value::Object(map) => {
            for (id, value) in map {
                match value {
                    Value::Object(attributes) => entities.push(Entity::new(id, attributes)),
                    _ => tracing::warn!(domain = %domain, entity_id = %id, "Dropping non-object entity"),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(attributes) => match entity_id(&attributes) {
                        Some(id) => entities.push(Entity::new(id, attributes)),
                        None => tracing::warn!(domain = %domain, "Dropping entity without id"),
                    },
                    _ => tracing::warn!(domain = %domain, "Dropping non-object entity"),
                }
            }
        }
        other => {
            return Err(FetchError::decode(
                domain.path(),
                format!("expected an object or array, got {}", json_kind(&other)),
            ));
        }
    }

    Ok(Snapshot::new(domain, entities, received_at))
}

fn entity_id(attributes: &Map<String, Value>) -> Option<String> {
    match attributes.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode a history body: an array of `{timestamp, <metric>...}` records
///
/// Timestamps are Unix seconds and become milliseconds.
pub fn decode_history(domain: Domain, id: &str, body: Value) -> Result<EntityHistory, FetchError> {
    let records = match body {
        Value::Array(records) => records,
        other => {
            return Err(FetchError::decode(
                format!("{}/{}", domain.path(), id),
                format!("expected an array, got {}", json_kind(&other)),
            ));
        }
    };

    let mut history = EntityHistory {
        domain,
        entity_id: id.to_string(),
        series: BTreeMap::new(),
        skipped: 0,
    };

    for record in records {
        let Value::Object(fields) = record else {
            history.skipped += 1;
            continue;
        };
        let Some(timestamp) = fields.get("timestamp").and_then(Value::as_f64) else {
            history.skipped += 1;
            continue;
        };
        let timestamp = unix_seconds_to_millis(timestamp);

        for (metric, value) in &fields {
            if metric == "timestamp" {
                continue;
            }
            if let Some(v) = value.as_f64().filter(|v| v.is_finite()) {
                history
                    .series
                    .entry(metric.clone())
                    .or_default()
                    .push(Sample::new(timestamp, v));
            }
        }
    }

    if history.skipped > 0 {
        tracing::debug!(domain = %domain, entity_id = %id, skipped = history.skipped, "History records without timestamp");
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticSource {
        snapshot: Value,
        history: Value,
    }

    #[async_trait]
    impl SnapshotSource for StaticSource {
        async fn fetch_snapshot(&self, _domain: Domain) -> Result<Value, FetchError> {
            Ok(self.snapshot.clone())
        }

        async fn fetch_entity(&self, _domain: Domain, id: &str) -> Result<Value, FetchError> {
            self.snapshot
                .get(id)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(id.to_string()))
        }

        async fn fetch_history(&self, _domain: Domain, id: &str) -> Result<Value, FetchError> {
            match &self.history {
                Value::Null => Err(FetchError::NotFound(id.to_string())),
                history => Ok(history.clone()),
            }
        }
    }

    fn aggregator(snapshot: Value, history: Value) -> DataAggregator {
        DataAggregator::new(Arc::new(StaticSource { snapshot, history }))
    }

    #[test]
    fn test_decode_object_snapshot() {
        let body = json!({
            "P1": {"capacite_totale": 100, "places_disponibles": 30},
            "P2": "garbage",
        });
        let snapshot = decode_snapshot(Domain::Parking, body, 42).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.received_at, 42);
        assert!(snapshot.get("P1").is_some());
    }

    #[test]
    fn test_decode_array_snapshot() {
        let body = json!([
            {"id": "AP001", "est_en_ligne": true},
            {"id": 7, "est_en_ligne": false},
            {"est_en_ligne": true}
        ]);
        let snapshot = decode_snapshot(Domain::Wifi, body, 0).unwrap();
        let ids: Vec<&str> = snapshot.ids().collect();
        assert_eq!(ids, vec!["7", "AP001"]);
    }

    #[test]
    fn test_decode_rejects_scalar_body() {
        let err = decode_snapshot(Domain::Weather, json!("oops"), 0).unwrap_err();
        assert!(err.to_string().contains("got a string"));
    }

    #[test]
    fn test_empty_snapshot_is_not_an_error() {
        let snapshot = decode_snapshot(Domain::TransportTaxi, json!({}), 0).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_decode_history() {
        let body = json!([
            {"timestamp": 1700000000.5, "puissance_signal": -60, "utilisateurs_connectes": 12},
            {"timestamp": 1700000030.0, "puissance_signal": -62},
            {"puissance_signal": -70},
            "noise"
        ]);
        let history = decode_history(Domain::Wifi, "AP001", body).unwrap();

        assert_eq!(history.skipped, 2);
        assert_eq!(
            history.samples("puissance_signal"),
            &[
                Sample::new(1_700_000_000_500, -60.0),
                Sample::new(1_700_000_030_000, -62.0)
            ]
        );
        assert_eq!(history.samples("utilisateurs_connectes").len(), 1);
        assert!(history.samples("niveau_congestion").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_through_source() {
        let aggregator = aggregator(
            json!({"S1": {"temperature": 21.5, "humidite": 40}}),
            json!([{"timestamp": 10, "temperature": 20.0}]),
        );

        let snapshot = aggregator.fetch_snapshot(Domain::Weather).await.unwrap();
        assert_eq!(snapshot.domain, Domain::Weather);

        let station = aggregator.fetch_entity(Domain::Weather, "S1").await.unwrap();
        assert_eq!(station.number("temperature"), Some(21.5));

        let missing = aggregator.fetch_entity(Domain::Weather, "S9").await;
        assert!(matches!(missing, Err(FetchError::NotFound(_))));

        let history = aggregator.fetch_history(Domain::Weather, "S1").await.unwrap();
        assert_eq!(history.samples("temperature"), &[Sample::new(10_000, 20.0)]);

        match aggregator.summarize(&snapshot) {
            DomainMetrics::Weather(summary) => assert_eq!(summary.stations, 1),
            other => panic!("unexpected metrics {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_history_is_empty() {
        let aggregator = aggregator(json!({"P1": {"places_disponibles": 3}}), Value::Null);

        let history = aggregator.fetch_history(Domain::Parking, "P1").await.unwrap();
        assert_eq!(history.entity_id, "P1");
        assert!(history.series.is_empty());
        assert_eq!(history.skipped, 0);
    }
}
