//! Per-episode duration statistics

use serde::Serialize;

/// Calculate a percentile from integer samples.
///
/// Uses linear interpolation between nearest ranks.
///
/// # Returns
///
/// * `Some(value)` - The percentile value
/// * `None` - If samples is empty or p is outside 0..=100
///
/// # Examples
///
/// ```
/// use episodes_collector::stats::percentile;
///
/// assert_eq!(percentile(&[1, 2, 3, 4, 5], 50.0), Some(3.0));
/// assert_eq!(percentile(&[10, 20], 50.0), Some(15.0));
/// ```
pub fn percentile(samples: &[i64], p: f64) -> Option<f64> {
    if samples.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    Some(percentile_sorted(&sorted, p))
}

fn percentile_sorted(sorted: &[i64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }

    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower_index = rank.floor() as usize;
    let upper_index = rank.ceil() as usize;

    let lower_value = sorted[lower_index] as f64;
    if lower_index == upper_index {
        lower_value
    } else {
        let upper_value = sorted[upper_index] as f64;
        let fraction = rank - lower_index as f64;
        lower_value + fraction * (upper_value - lower_value)
    }
}

/// Summary of the retained samples for one episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub name: String,
    pub count: usize,
    pub min: i64,
    pub p50: f64,
    pub p95: f64,
    pub max: i64,
    pub mean: f64,
}

impl EpisodeSummary {
    /// `None` when there are no samples
    pub fn from_samples(name: &str, samples: &[i64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: i128 = sorted.iter().map(|&v| i128::from(v)).sum();

        Some(EpisodeSummary {
            name: name.to_string(),
            count,
            min: sorted[0],
            p50: percentile_sorted(&sorted, 50.0),
            p95: percentile_sorted(&sorted, 95.0),
            max: sorted[count - 1],
            mean: sum as f64 / count as f64,
        })
    }
}
