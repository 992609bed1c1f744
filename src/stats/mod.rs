//! Summary statistics over force sample sequences.
//!
//! Every function takes an unsorted slice and copies/sorts internally where
//! needed; empty input yields 0 rather than NaN so downstream display code
//! never has to special-case it.

pub mod rep;

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Midpoint of the sorted values, average of the two middles for even counts.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample standard deviation (n-1 denominator); 0 when fewer than two values.
pub fn std_deviation(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }

    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Population standard deviation (n denominator); 0 for an empty slice.
pub fn population_std_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Linear-interpolation percentile: index `p * (n - 1)` over the sorted values.
/// `p` is a fraction in `[0, 1]`.
pub fn percentile(p: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }

    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Median of the sequence after dropping `fraction` of the samples from each
/// end of the series. The ends of a hold are pickup/release transients, so
/// the trim runs on the time series, not on the sorted values. Falls back to
/// the plain median below 5 samples, where trimming would discard too much
/// of the signal.
pub fn trimmed_median(values: &[f64], fraction: f64) -> f64 {
    if values.len() < 5 {
        return median(values);
    }

    let drop = (values.len() as f64 * fraction) as usize;
    let trimmed = &values[drop..values.len() - drop];
    median(trimmed)
}

/// Default trim fraction used for held-weight estimation.
pub const DEFAULT_TRIM_FRACTION: f64 = 0.3;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {} to be close to {}",
            actual,
            expected
        );
    }

    #[test]
    fn median_odd_count() {
        assert_close(median(&[1.0, 3.0, 2.0]), 2.0);
    }

    #[test]
    fn median_even_count_averages_middles() {
        assert_close(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn median_empty_is_zero() {
        assert_close(median(&[]), 0.0);
    }

    #[test]
    fn sample_std_deviation_uses_n_minus_one() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_close(std_deviation(&values), 2.138);
    }

    #[test]
    fn population_std_deviation_uses_n() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_close(population_std_deviation(&values), 2.0);
    }

    #[test]
    fn std_deviation_degenerate_inputs() {
        assert_close(std_deviation(&[]), 0.0);
        assert_close(std_deviation(&[4.2]), 0.0);
        assert_close(population_std_deviation(&[]), 0.0);
    }

    #[test]
    fn percentile_interpolates_linearly() {
        assert_close(percentile(0.3, &[1.0, 2.0, 3.0, 4.0, 5.0]), 2.2);
    }

    #[test]
    fn percentile_endpoints() {
        let values = [5.0, 1.0, 3.0];
        assert_close(percentile(0.0, &values), 1.0);
        assert_close(percentile(1.0, &values), 5.0);
        assert_close(percentile(0.5, &values), 3.0);
    }

    #[test]
    fn trimmed_median_drops_transients() {
        let values = [5.0, 10.0, 15.0, 20.0, 20.0, 20.0, 20.0, 15.0, 10.0, 5.0];
        assert_close(trimmed_median(&values, DEFAULT_TRIM_FRACTION), 20.0);
    }

    #[test]
    fn trimmed_median_falls_back_below_five_samples() {
        let values = [1.0, 2.0, 100.0, 3.0];
        assert_close(trimmed_median(&values, DEFAULT_TRIM_FRACTION), 2.5);
    }

    #[test]
    fn mean_of_values() {
        assert_close(mean(&[15.0, 16.0, 17.0]), 16.0);
        assert_close(mean(&[]), 0.0);
    }
}
