//! Completed-rep analysis: the stable-band filter that isolates the holding
//! portion of a rep from pickup/release transients, and the summary record
//! handed to whoever aggregates finished reps.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::stats;

/// Stable band of a completed rep, derived from the middle 50% of its samples.
///
/// `start_index..=end_index` is the slice of the raw sample array considered
/// "holding"; everything outside it is pickup/release transient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub start_index: usize,
    pub end_index: usize,
    pub band_median: f64,
    pub band_stddev: f64,
    pub band_lower: f64,
    pub band_upper: f64,
}

/// Computes the stable band for a rep's raw samples.
///
/// The middle 50% of the array (first and last quarter dropped) gives a
/// median and population standard deviation; the band is `median ± 3σ`.
/// The filter range runs from the first sample inside the band scanning
/// forward to the last sample inside it scanning backward. Fewer than 4
/// samples short-circuits to the full range with a zeroed band.
pub struct RepFilter;

impl RepFilter {
    pub fn compute(samples: &[f64]) -> FilterResult {
        if samples.len() < 4 {
            return FilterResult {
                start_index: 0,
                end_index: samples.len().saturating_sub(1),
                band_median: 0.0,
                band_stddev: 0.0,
                band_lower: 0.0,
                band_upper: 0.0,
            };
        }

        let quarter = samples.len() / 4;
        let core = &samples[quarter..samples.len() - quarter];

        let band_median = stats::median(core);
        let band_stddev = stats::population_std_deviation(core);
        let band_lower = band_median - 3.0 * band_stddev;
        let band_upper = band_median + 3.0 * band_stddev;

        let in_band = |v: f64| v >= band_lower && v <= band_upper;

        let start_index = samples
            .iter()
            .position(|&v| in_band(v))
            .unwrap_or(0);
        let end_index = samples
            .iter()
            .rposition(|&v| in_band(v))
            .unwrap_or(samples.len() - 1);

        FilterResult {
            start_index,
            end_index,
            band_median,
            band_stddev,
            band_lower,
            band_upper,
        }
    }
}

/// One completed grip, produced when the state machine detects grip failure.
///
/// The filter result is computed once here; callers read raw or filtered
/// statistics without re-running the band scan.
#[derive(Debug, Clone)]
pub struct RepResult {
    pub start_time: SystemTime,
    pub duration: Duration,
    pub samples: Vec<f64>,
    pub target_weight: Option<f64>,
    filter: FilterResult,
}

impl RepResult {
    pub fn new(
        start_time: SystemTime,
        duration: Duration,
        samples: Vec<f64>,
        target_weight: Option<f64>,
    ) -> Self {
        let filter = RepFilter::compute(&samples);
        RepResult {
            start_time,
            duration,
            samples,
            target_weight,
            filter,
        }
    }

    pub fn filter(&self) -> &FilterResult {
        &self.filter
    }

    /// The holding portion of the rep, per the stable-band filter.
    pub fn filtered_samples(&self) -> &[f64] {
        if self.samples.is_empty() {
            return &self.samples;
        }
        &self.samples[self.filter.start_index..=self.filter.end_index]
    }

    pub fn raw_mean(&self) -> f64 {
        stats::mean(&self.samples)
    }

    pub fn raw_median(&self) -> f64 {
        stats::median(&self.samples)
    }

    pub fn raw_std_deviation(&self) -> f64 {
        stats::std_deviation(&self.samples)
    }

    pub fn filtered_mean(&self) -> f64 {
        stats::mean(self.filtered_samples())
    }

    pub fn filtered_median(&self) -> f64 {
        stats::median(self.filtered_samples())
    }

    pub fn filtered_std_deviation(&self) -> f64 {
        stats::std_deviation(self.filtered_samples())
    }

    /// Percentile of the filtered slice, `p` in `[0, 1]`.
    pub fn filtered_percentile(&self, p: f64) -> f64 {
        stats::percentile(p, self.filtered_samples())
    }

    pub fn filtered_quartiles(&self) -> (f64, f64, f64) {
        (
            self.filtered_percentile(0.25),
            self.filtered_percentile(0.5),
            self.filtered_percentile(0.75),
        )
    }
}
