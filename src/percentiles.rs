//! Exact percentile computation over a finite, already-materialized sample.
//!
//! Unlike a streaming latency tracker, the calculator always has the whole
//! population in hand before it needs a single number out of it, so we skip
//! histogram bucketing entirely and interpolate linearly between ranks —
//! the calculator must be bitwise deterministic across runs (spec'd
//! invariant), which a reservoir/bucketed estimator cannot guarantee.

use serde::Serialize;

/// Summary statistics for a sample of day-denominated durations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// One entry per requested percentile, in the same order as requested.
    pub percentiles: Vec<(u8, Option<f64>)>,
}

/// Compute `PercentileStats` over `samples` for each percentile in `ranks`.
/// `samples` need not be sorted; `ranks` are whole numbers in (0, 100).
pub fn compute(samples: &[f64], ranks: &[u8]) -> PercentileStats {
    if samples.is_empty() {
        return PercentileStats {
            count: 0,
            min: None,
            max: None,
            mean: None,
            median: None,
            percentiles: ranks.iter().map(|&r| (r, None)).collect(),
        };
    }

    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN duration"));

    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let mean = sum / count as f64;

    PercentileStats {
        count,
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        mean: Some(mean),
        median: Some(percentile(&sorted, 50)),
        percentiles: ranks.iter().map(|&r| (r, Some(percentile(&sorted, r)))).collect(),
    }
}

/// Linear interpolation between adjacent ranks, `sorted` ascending and non-empty.
fn percentile(sorted: &[f64], rank: u8) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (rank as f64 / 100.0).clamp(0.0, 1.0);
    let idx = rank * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_is_all_null() {
        let stats = compute(&[], &[50, 85, 95]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.median, None);
        assert!(stats.percentiles.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn single_item_median_equals_value() {
        let stats = compute(&[4.33], &[50]);
        assert_eq!(stats.median, Some(4.33));
        assert_eq!(stats.mean, Some(4.33));
        assert_eq!(stats.min, Some(4.33));
        assert_eq!(stats.max, Some(4.33));
    }

    #[test]
    fn three_item_scenario_matches_spec_example() {
        // created T-10,T-7,T-3 closed T-5,T-2,T-0 -> lead times 5,5,3
        let stats = compute(&[5.0, 5.0, 3.0], &[50, 85, 95]);
        assert_eq!(stats.count, 3);
        assert!((stats.mean.unwrap() - 4.333333333333333).abs() < 1e-9);
        assert_eq!(stats.median, Some(5.0));
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        // rank 50 on 5 elements: idx = 2.0 -> sorted[2] = 3.0
        assert_eq!(percentile(&sorted, 50), 3.0);
        // rank 25: idx = 1.0 -> sorted[1] = 2.0
        assert_eq!(percentile(&sorted, 25), 2.0);
    }

    #[test]
    fn deterministic_across_repeated_runs() {
        let samples = [3.1, 1.4, 1.5, 9.2, 6.5];
        let a = compute(&samples, &[50, 85, 95]);
        let b = compute(&samples, &[50, 85, 95]);
        assert_eq!(a, b);
    }
}
