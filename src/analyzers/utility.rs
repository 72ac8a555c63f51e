//! Rank-based statistics over ascending-sorted samples.
//!
//! Ranks are 1-based throughout.

/// Standard median: mean of the values at ranks `⌊(n+1)/2⌋` and `⌊(n+2)/2⌋`.
/// Returns `None` for empty input.
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let lo = sorted[(n + 1) / 2 - 1];
    let hi = sorted[(n + 2) / 2 - 1];
    Some((lo + hi) / 2.0)
}

/// Nearest-rank percentile: the value at rank `⌈n·percent/100⌉`, no interpolation.
///
/// Returns `None` for empty input. `percent` is clamped to `1..=100`.
pub fn nearest_rank(sorted: &[f64], percent: usize) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let percent = percent.clamp(1, 100);
    let rank = (n * percent).div_ceil(100);
    Some(sorted[rank - 1])
}

/// Median of `|x - center|` over `values`. Returns `None` for empty input.
pub fn median_absolute_deviation(values: &[f64], center: f64) -> Option<f64> {
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    median(&deviations)
}

/// Modified z-score `0.6745 · (x − median) / mad`.
///
/// Returns `None` when `mad` is zero or not finite.
pub fn modified_z_score(value: f64, median: f64, mad: f64) -> Option<f64> {
    const NORMAL_CONSISTENCY: f64 = 0.6745;

    if mad == 0.0 || !mad.is_finite() {
        return None;
    }
    Some(NORMAL_CONSISTENCY * (value - median) / mad)
}
