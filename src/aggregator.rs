//! # Bucketed Aggregator
//!
//! Folds samples into fixed-size time windows. Window boundaries are
//! half-open `[start, start + granularity)` and keyed by the floor of the
//! sample timestamp divided by the granularity.
//!
//! Every sample is accounted twice within its window: once under its own
//! label and once under the empty label `""`, which is the whole-run
//! aggregate. When a sample belongs to a later window than the one currently
//! open, the open window is closed and returned as a [`DataPoint`] carrying
//! both the per-window (`current`) and the running (`cumulative`) KPI sets.
//!
//! Samples that belong to an earlier window than the open one are folded
//! into the open window, so emitted timestamps never go backwards and no
//! sample is dropped.

use crate::metrics::KpiSet;
use crate::sample::RawSample;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// The label under which every sample is aggregated
pub const AGGREGATE_LABEL: &str = "";

/// KPI sets keyed by label
pub type KpiSets = BTreeMap<String, KpiSet>;

/// One emitted time window
#[derive(Debug, Clone, Serialize)]
pub struct DataPoint {
    /// Window start, seconds since the Unix epoch
    pub timestamp: f64,
    /// Statistics for this window only
    pub current: KpiSets,
    /// Statistics from the start of the run up to and including this window
    pub cumulative: KpiSets,
}

impl DataPoint {
    /// Per-window aggregate over all labels
    pub fn current_total(&self) -> Option<&KpiSet> {
        self.current.get(AGGREGATE_LABEL)
    }

    /// Whole-run aggregate over all labels
    pub fn cumulative_total(&self) -> Option<&KpiSet> {
        self.cumulative.get(AGGREGATE_LABEL)
    }
}

#[derive(Debug)]
struct OpenWindow {
    index: i64,
    sets: KpiSets,
}

/// Folds samples into windows and tracks the cumulative totals
#[derive(Debug)]
pub struct BucketedAggregator {
    granularity: f64,
    open: Option<OpenWindow>,
    cumulative: KpiSets,
    late_samples: u64,
}

impl BucketedAggregator {
    /// Create an aggregator with the given window size.
    ///
    /// A zero granularity falls back to one second.
    pub fn new(granularity: Duration) -> Self {
        let secs = granularity.as_secs_f64();
        Self {
            granularity: if secs > 0.0 { secs } else { 1.0 },
            open: None,
            cumulative: KpiSets::new(),
            late_samples: 0,
        }
    }

    /// Add a sample, returning the previous window if this sample closed it
    pub fn add(&mut self, sample: &RawSample) -> Option<DataPoint> {
        let index = (sample.timestamp / self.granularity).floor() as i64;

        let closed = match self.open.as_ref().map(|w| w.index) {
            Some(open) if index > open => self.close(),
            Some(open) if index < open => {
                self.late_samples += 1;
                debug!(
                    "Sample at {} predates open window {}, folding it in",
                    sample.timestamp,
                    open as f64 * self.granularity
                );
                None
            }
            _ => None,
        };

        let open = self.open.get_or_insert_with(|| OpenWindow {
            index,
            sets: KpiSets::new(),
        });
        open.sets
            .entry(AGGREGATE_LABEL.to_string())
            .or_default()
            .add_sample(sample);
        if sample.label != AGGREGATE_LABEL {
            open.sets
                .entry(sample.label.clone())
                .or_default()
                .add_sample(sample);
        }

        closed
    }

    /// Close the open window even though it has not elapsed yet
    pub fn flush(&mut self) -> Option<DataPoint> {
        self.close()
    }

    /// Number of samples folded into a later window than their own
    pub fn late_samples(&self) -> u64 {
        self.late_samples
    }

    pub fn has_open_window(&self) -> bool {
        self.open.is_some()
    }

    fn close(&mut self) -> Option<DataPoint> {
        let window = self.open.take()?;
        for (label, kpi) in &window.sets {
            self.cumulative.entry(label.clone()).or_default().merge(kpi);
        }

        Some(DataPoint {
            timestamp: window.index as f64 * self.granularity,
            current: window.sets,
            cumulative: self.cumulative.clone(),
        })
    }
}
