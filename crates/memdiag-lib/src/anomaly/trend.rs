//! Trend fitting over ordered numeric samples
//!
//! Computes percentage growth, the fraction of rising steps and an ordinary
//! least squares fit against the sample index. Shared by the sliding-window
//! detector, the leak report engine and the allocation ranker.

use serde::{Deserialize, Serialize};

/// Result of fitting a trend to one series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    /// First value of the series
    pub start: f64,
    /// Last value of the series
    pub end: f64,
    /// `end - start`
    pub delta: f64,
    /// Relative growth first to last, in percent (0 when undefined)
    pub growth_percent: f64,
    /// Fraction of consecutive pairs where the value strictly increased
    pub trend_ratio: f64,
    /// Least squares slope in units per sample
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination, clamped to [0, 1]
    pub r_squared: f64,
    pub samples: usize,
}

impl TrendResult {
    /// Fit a trend to `values`, in chronological order
    pub fn fit(values: &[f64]) -> Self {
        let Some((&start, &end)) = values.first().zip(values.last()) else {
            return Self::default();
        };

        let (slope, intercept, r_squared) = linear_fit(values);

        Self {
            start,
            end,
            delta: end - start,
            growth_percent: growth_percent(values),
            trend_ratio: trend_ratio(values),
            slope,
            intercept,
            r_squared,
            samples: values.len(),
        }
    }

    /// Whether growth and trend both clear the given minimums
    pub fn exceeds(&self, growth_percent: f64, trend_ratio: f64) -> bool {
        self.growth_percent >= growth_percent && self.trend_ratio >= trend_ratio
    }
}

/// (last - first) / first * 100; 0 when first is 0 or fewer than 2 samples
pub fn growth_percent(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let first = values[0];
    let last = values[values.len() - 1];
    if first == 0.0 {
        return 0.0;
    }
    (last - first) / first * 100.0
}

/// Fraction of consecutive pairs that strictly increase; 0 below 2 samples
pub fn trend_ratio(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let increasing = values.windows(2).filter(|w| w[1] > w[0]).count();
    increasing as f64 / (values.len() - 1) as f64
}

/// Closed-form least squares against x = 0..n-1
///
/// Returns `(slope, intercept, r_squared)`. R² is 0 when the series has
/// fewer than 2 points or no variance.
pub fn linear_fit(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0, 0.0);
    }
    if n < 2 {
        return (0.0, values[0], 0.0);
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        ss_xy += dx * (y - mean_y);
        ss_xx += dx * dx;
    }

    if ss_xx.abs() < f64::EPSILON {
        return (0.0, mean_y, 0.0);
    }

    let slope = ss_xy / ss_xx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    if ss_tot.abs() < f64::EPSILON {
        return (slope, intercept, 0.0);
    }

    let r_squared = (1.0 - ss_res / ss_tot).clamp(0.0, 1.0);
    (slope, intercept, r_squared)
}
