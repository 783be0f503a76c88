//! Bounded, time-ordered sample buffer
//!
//! Samples are kept sorted by timestamp. Late samples are inserted at their
//! position, a sample with an existing timestamp overwrites the stored value,
//! and once the buffer is full the oldest sample is evicted.

use std::collections::VecDeque;

use crate::model::Sample;

/// What happened to a sample handed to [`TimeSeries::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Newest sample, pushed at the end
    Appended,
    /// Late sample, inserted before newer ones
    Inserted,
    /// Same timestamp already present, value overwritten
    Replaced,
    /// Older than everything in a full buffer, discarded
    Expired,
}

/// Rolling history of one (domain, entity, metric)
#[derive(Debug, Clone)]
pub struct TimeSeries {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl TimeSeries {
    /// Create an empty series holding at most `capacity` samples (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Insert one sample, keeping timestamp order
    pub fn insert(&mut self, sample: Sample) -> InsertOutcome {
        let idx = self
            .samples
            .partition_point(|s| s.timestamp < sample.timestamp);

        if let Some(existing) = self.samples.get_mut(idx) {
            if existing.timestamp == sample.timestamp {
                existing.value = sample.value;
                return InsertOutcome::Replaced;
            }
        }

        if idx == 0 && self.samples.len() >= self.capacity {
            return InsertOutcome::Expired;
        }

        let outcome = if idx == self.samples.len() {
            InsertOutcome::Appended
        } else {
            InsertOutcome::Inserted
        };

        self.samples.insert(idx, sample);
        self.evict_overflow();
        outcome
    }

    /// Discard the buffer and load `samples` in their place
    ///
    /// Input order does not matter; duplicate timestamps keep the value that
    /// came last in the input. Only the newest `capacity` samples are kept.
    pub fn replace(&mut self, samples: impl IntoIterator<Item = Sample>) {
        let mut sorted: Vec<Sample> = samples.into_iter().collect();
        // stable: equal timestamps keep input order, so the later one wins below
        sorted.sort_by_key(|s| s.timestamp);

        let mut deduped: Vec<Sample> = Vec::with_capacity(sorted.len());
        for sample in sorted {
            match deduped.last_mut() {
                Some(last) if last.timestamp == sample.timestamp => *last = sample,
                _ => deduped.push(sample),
            }
        }

        let skip = deduped.len().saturating_sub(self.capacity);
        self.samples = deduped.into_iter().skip(skip).collect();
    }

    /// Change the capacity, evicting the oldest samples if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_overflow();
    }

    /// Samples in timestamp order
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    fn evict_overflow(&mut self) {
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamps(series: &TimeSeries) -> Vec<i64> {
        series.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn test_append_in_order() {
        let mut series = TimeSeries::with_capacity(10);
        assert_eq!(series.insert(Sample::new(1000, 1.0)), InsertOutcome::Appended);
        assert_eq!(series.insert(Sample::new(2000, 2.0)), InsertOutcome::Appended);
        assert_eq!(timestamps(&series), vec![1000, 2000]);
    }

    #[test]
    fn test_late_sample_inserted_in_place() {
        let mut series = TimeSeries::with_capacity(10);
        series.insert(Sample::new(1000, 1.0));
        series.insert(Sample::new(3000, 3.0));
        assert_eq!(series.insert(Sample::new(2000, 2.0)), InsertOutcome::Inserted);
        assert_eq!(timestamps(&series), vec![1000, 2000, 3000]);
    }

    #[test]
    fn test_duplicate_timestamp_overwrites() {
        let mut series = TimeSeries::with_capacity(10);
        series.insert(Sample::new(1000, 1.0));
        assert_eq!(series.insert(Sample::new(1000, 5.0)), InsertOutcome::Replaced);
        assert_eq!(series.len(), 1);
        assert_eq!(series.latest().unwrap().value, 5.0);
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let mut series = TimeSeries::with_capacity(3);
        for ts in [1000, 2000, 3000, 4000] {
            series.insert(Sample::new(ts, ts as f64));
        }
        assert_eq!(timestamps(&series), vec![2000, 3000, 4000]);
    }

    #[test]
    fn test_late_sample_older_than_full_buffer_expires() {
        let mut series = TimeSeries::with_capacity(2);
        series.insert(Sample::new(2000, 2.0));
        series.insert(Sample::new(3000, 3.0));
        assert_eq!(series.insert(Sample::new(1000, 1.0)), InsertOutcome::Expired);
        assert_eq!(timestamps(&series), vec![2000, 3000]);
    }

    #[test]
    fn test_late_sample_into_full_buffer_evicts_oldest() {
        let mut series = TimeSeries::with_capacity(3);
        for ts in [1000, 2000, 4000] {
            series.insert(Sample::new(ts, 0.0));
        }
        series.insert(Sample::new(3000, 0.0));
        assert_eq!(timestamps(&series), vec![2000, 3000, 4000]);
    }

    #[test]
    fn test_replace_sorts_dedups_and_truncates() {
        let mut series = TimeSeries::with_capacity(3);
        series.insert(Sample::new(9000, 9.0));

        series.replace(vec![
            Sample::new(4000, 4.0),
            Sample::new(1000, 1.0),
            Sample::new(3000, 3.0),
            Sample::new(2000, 2.0),
            Sample::new(3000, 30.0),
        ]);

        assert_eq!(timestamps(&series), vec![2000, 3000, 4000]);
        let values: Vec<f64> = series.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2.0, 30.0, 4.0]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut series = TimeSeries::with_capacity(0);
        series.insert(Sample::new(1, 1.0));
        series.insert(Sample::new(2, 2.0));
        assert_eq!(series.capacity(), 1);
        assert_eq!(timestamps(&series), vec![2]);
    }

    #[test]
    fn test_shrinking_capacity_evicts() {
        let mut series = TimeSeries::with_capacity(5);
        for ts in 1..=5 {
            series.insert(Sample::new(ts, 0.0));
        }
        series.set_capacity(2);
        assert_eq!(timestamps(&series), vec![4, 5]);
    }
}
