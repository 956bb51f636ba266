//! # KPI Sets
//!
//! A [`KpiSet`] holds the statistics for one label over one time window (or
//! over the whole run, for cumulative sets). Response times go into an HDR
//! histogram at microsecond resolution so percentiles can be derived later
//! without keeping individual samples around; counters and the error list
//! are plain maps.
//!
//! Sets are mergeable: the cumulative set for a label is the counter-wise sum
//! of every per-window set seen so far, and histograms merge losslessly.

use crate::sample::RawSample;
use hdrhistogram::Histogram;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;
use tracing::warn;

/// Percentiles materialised when a set is serialized
pub const REPORTED_PERCENTILES: [f64; 4] = [50.0, 90.0, 95.0, 99.0];

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Statistics for one label within one window
#[derive(Debug, Clone)]
pub struct KpiSet {
    samples: u64,
    successes: u64,
    failures: u64,
    errors: BTreeMap<String, u64>,
    rt_sum: f64,
    rt_min: Option<f64>,
    rt_max: f64,
    histogram: Histogram<u64>,
}

impl Default for KpiSet {
    fn default() -> Self {
        Self::new()
    }
}

impl KpiSet {
    /// Create an empty set
    pub fn new() -> Self {
        // Auto-resizing with 3 significant figures; construction only fails
        // for precisions above 5.
        let histogram =
            Histogram::<u64>::new(3).expect("3 significant figures is a valid precision");

        Self {
            samples: 0,
            successes: 0,
            failures: 0,
            errors: BTreeMap::new(),
            rt_sum: 0.0,
            rt_min: None,
            rt_max: 0.0,
            histogram,
        }
    }

    /// Fold one sample into the set
    pub fn add_sample(&mut self, sample: &RawSample) {
        self.samples += 1;
        if sample.outcome.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if let Some(message) = sample.outcome.message() {
            *self.errors.entry(message.to_string()).or_insert(0) += 1;
        }

        let rt = sample.elapsed;
        self.rt_sum += rt;
        self.rt_min = Some(self.rt_min.map_or(rt, |min| min.min(rt)));
        self.rt_max = self.rt_max.max(rt);
        self.histogram
            .saturating_record((rt * MICROS_PER_SEC).round() as u64);
    }

    /// Add another set's counters and response times into this one
    pub fn merge(&mut self, other: &KpiSet) {
        self.samples += other.samples;
        self.successes += other.successes;
        self.failures += other.failures;
        for (message, count) in &other.errors {
            *self.errors.entry(message.clone()).or_insert(0) += count;
        }

        self.rt_sum += other.rt_sum;
        self.rt_min = match (self.rt_min, other.rt_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.rt_max = self.rt_max.max(other.rt_max);
        if let Err(e) = self.histogram.add(&other.histogram) {
            warn!("Dropping response times while merging KPI sets: {}", e);
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Error messages and how often each occurred
    pub fn errors(&self) -> &BTreeMap<String, u64> {
        &self.errors
    }

    /// Sum of response times in seconds
    pub fn rt_sum(&self) -> f64 {
        self.rt_sum
    }

    /// Average response time in seconds, zero for an empty set
    pub fn avg_rt(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.rt_sum / self.samples as f64
        }
    }

    pub fn min_rt(&self) -> f64 {
        self.rt_min.unwrap_or(0.0)
    }

    pub fn max_rt(&self) -> f64 {
        self.rt_max
    }

    /// Response time at the given percentile, in seconds
    pub fn percentile(&self, percentile: f64) -> f64 {
        if self.histogram.is_empty() {
            return 0.0;
        }
        self.histogram.value_at_percentile(percentile) as f64 / MICROS_PER_SEC
    }
}

impl Serialize for KpiSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let percentiles: BTreeMap<String, f64> = REPORTED_PERCENTILES
            .iter()
            .map(|&p| (format!("p{}", p), self.percentile(p)))
            .collect();

        let mut state = serializer.serialize_struct("KpiSet", 9)?;
        state.serialize_field("samples", &self.samples)?;
        state.serialize_field("successes", &self.successes)?;
        state.serialize_field("failures", &self.failures)?;
        state.serialize_field("errors", &self.errors)?;
        state.serialize_field("rt_sum", &self.rt_sum)?;
        state.serialize_field("avg_rt", &self.avg_rt())?;
        state.serialize_field("min_rt", &self.min_rt())?;
        state.serialize_field("max_rt", &self.max_rt())?;
        state.serialize_field("percentiles", &percentiles)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Outcome;

    fn sample(outcome: Outcome, elapsed: f64) -> RawSample {
        RawSample {
            timestamp: 1_700_000_000.0,
            label: "login".to_string(),
            outcome,
            elapsed,
        }
    }

    #[test]
    fn test_empty_set() {
        let kpi = KpiSet::new();
        assert_eq!(kpi.samples(), 0);
        assert_eq!(kpi.avg_rt(), 0.0);
        assert_eq!(kpi.min_rt(), 0.0);
        assert_eq!(kpi.percentile(99.0), 0.0);
    }

    #[test]
    fn test_add_sample_counts_outcomes() {
        let mut kpi = KpiSet::new();
        kpi.add_sample(&sample(Outcome::Success, 0.1));
        kpi.add_sample(&sample(Outcome::Success, 0.3));
        kpi.add_sample(&sample(Outcome::Failure(None), 0.2));
        kpi.add_sample(&sample(Outcome::Error("timeout".to_string()), 1.0));
        kpi.add_sample(&sample(Outcome::Error("timeout".to_string()), 1.0));

        assert_eq!(kpi.samples(), 5);
        assert_eq!(kpi.successes(), 2);
        assert_eq!(kpi.failures(), 3);
        assert_eq!(kpi.errors().get("timeout"), Some(&2));
        assert_eq!(kpi.min_rt(), 0.1);
        assert_eq!(kpi.max_rt(), 1.0);
        assert!((kpi.avg_rt() - 0.52).abs() < 1e-9);
    }

    #[test]
    fn test_merge_is_counter_wise_sum() {
        let mut a = KpiSet::new();
        a.add_sample(&sample(Outcome::Success, 0.05));
        a.add_sample(&sample(Outcome::Error("reset".to_string()), 0.5));

        let mut b = KpiSet::new();
        b.add_sample(&sample(Outcome::Success, 0.01));
        b.add_sample(&sample(Outcome::Error("reset".to_string()), 2.0));
        b.add_sample(&sample(Outcome::Failure(Some("503".to_string())), 0.2));

        a.merge(&b);
        assert_eq!(a.samples(), 5);
        assert_eq!(a.successes(), 2);
        assert_eq!(a.failures(), 3);
        assert_eq!(a.errors().get("reset"), Some(&2));
        assert_eq!(a.errors().get("503"), Some(&1));
        assert_eq!(a.min_rt(), 0.01);
        assert_eq!(a.max_rt(), 2.0);
        assert!((a.rt_sum() - 2.76).abs() < 1e-9);
    }

    #[test]
    fn test_merge_into_empty_keeps_min() {
        let mut empty = KpiSet::new();
        let mut other = KpiSet::new();
        other.add_sample(&sample(Outcome::Success, 0.4));
        empty.merge(&other);
        assert_eq!(empty.min_rt(), 0.4);
    }

    #[test]
    fn test_percentiles_from_histogram() {
        let mut kpi = KpiSet::new();
        for ms in 1..=100 {
            kpi.add_sample(&sample(Outcome::Success, ms as f64 / 1000.0));
        }
        let p50 = kpi.percentile(50.0);
        let p99 = kpi.percentile(99.0);
        assert!((p50 - 0.050).abs() < 0.001, "p50 was {}", p50);
        assert!((p99 - 0.099).abs() < 0.001, "p99 was {}", p99);
    }

    #[test]
    fn test_serialize_includes_percentiles() {
        let mut kpi = KpiSet::new();
        kpi.add_sample(&sample(Outcome::Success, 0.2));
        let json = serde_json::to_value(&kpi).unwrap();
        assert_eq!(json["samples"], 1);
        assert_eq!(json["successes"], 1);
        assert!(json["percentiles"]["p50"].as_f64().unwrap() > 0.19);
        assert!(json["percentiles"].get("p99").is_some());
    }
}
