//! TimeSeriesStore - rolling chart history per (domain, entity, metric)
//!
//! A cache in front of the backend history endpoint. Callers never see the
//! buffer size policy: capacity is resolved per domain when a series is
//! first created.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::series::{InsertOutcome, TimeSeries};
use crate::config::HistoryConfig;
use crate::model::{Domain, Sample};

/// Identifies one chart series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub domain: Domain,
    pub entity_id: String,
    pub metric: String,
}

impl SeriesKey {
    pub fn new(domain: Domain, entity_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            domain,
            entity_id: entity_id.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.entity_id, self.metric)
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub series: usize,
    pub samples: usize,
}

/// Owns every TimeSeries of the dashboard
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    series: HashMap<SeriesKey, TimeSeries>,
    default_capacity: usize,
    capacities: HashMap<Domain, usize>,
}

impl TimeSeriesStore {
    /// Create a store where every series holds `default_capacity` samples
    pub fn new(default_capacity: usize) -> Self {
        Self {
            series: HashMap::new(),
            default_capacity: default_capacity.max(1),
            capacities: HashMap::new(),
        }
    }

    /// Create a store sized from the `[history]` config section
    pub fn from_config(config: &HistoryConfig) -> Self {
        let mut store = Self::new(config.default_capacity);
        for (name, capacity) in &config.capacity {
            match name.parse::<Domain>() {
                Ok(domain) => store = store.with_domain_capacity(domain, *capacity),
                Err(e) => tracing::warn!(error = %e, "Ignoring history capacity override"),
            }
        }
        store
    }

    /// Override the capacity for one domain
    pub fn with_domain_capacity(mut self, domain: Domain, capacity: usize) -> Self {
        self.capacities.insert(domain, capacity.max(1));
        self
    }

    /// Capacity applied to series of `domain`
    pub fn capacity_for(&self, domain: Domain) -> usize {
        self.capacities
            .get(&domain)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Insert one sample, preserving timestamp order
    pub fn append(
        &mut self,
        domain: Domain,
        entity_id: &str,
        metric: &str,
        sample: Sample,
    ) -> InsertOutcome {
        self.series_mut(SeriesKey::new(domain, entity_id, metric))
            .insert(sample)
    }

    /// Load a fetched history, discarding the rolling buffer for that key
    ///
    /// Returns the number of samples kept after truncation.
    pub fn replace_history(
        &mut self,
        domain: Domain,
        entity_id: &str,
        metric: &str,
        samples: impl IntoIterator<Item = Sample>,
    ) -> usize {
        let series = self.series_mut(SeriesKey::new(domain, entity_id, metric));
        series.replace(samples);
        series.len()
    }

    /// Ordered copy of one series, empty if unknown
    pub fn get_series(&self, domain: Domain, entity_id: &str, metric: &str) -> Vec<Sample> {
        self.series
            .get(&SeriesKey::new(domain, entity_id, metric))
            .map(TimeSeries::to_vec)
            .unwrap_or_default()
    }

    /// Borrow a series by key
    pub fn series(&self, key: &SeriesKey) -> Option<&TimeSeries> {
        self.series.get(key)
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.series.contains_key(key)
    }

    /// Whether any series exists for this entity
    pub fn has_entity(&self, domain: Domain, entity_id: &str) -> bool {
        self.series
            .keys()
            .any(|k| k.domain == domain && k.entity_id == entity_id)
    }

    /// Keys of one domain, sorted
    pub fn keys_for(&self, domain: Domain) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self
            .series
            .keys()
            .filter(|k| k.domain == domain)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Drop series of entities of `domain` that are not in `live_ids`
    ///
    /// Returns the number of series removed.
    pub fn retain_entities(&mut self, domain: Domain, live_ids: &HashSet<&str>) -> usize {
        let before = self.series.len();
        self.series
            .retain(|k, _| k.domain != domain || live_ids.contains(k.entity_id.as_str()));
        before - self.series.len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            series: self.series.len(),
            samples: self.series.values().map(TimeSeries::len).sum(),
        }
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    fn series_mut(&mut self, key: SeriesKey) -> &mut TimeSeries {
        let capacity = self.capacity_for(key.domain);
        self.series
            .entry(key)
            .or_insert_with(|| TimeSeries::with_capacity(capacity))
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::from_config(&HistoryConfig::default())
    }
}
