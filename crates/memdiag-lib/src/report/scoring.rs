//! Leak scoring rules
//!
//! Maps the trend of a memory series onto a confidence band and a score
//! inside that band. The same rules score process RSS in the leak report
//! and per-key growth in allocation streams.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::anomaly::TrendResult;
use crate::error::{DiagError, Result};

/// Confidence that a series is leaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

/// Scoring thresholds that are exposed as configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum r² for the High band
    pub high_fit_r_squared: f64,
    /// Resource growth, in percent, above which a correlation warning is raised
    pub correlation_growth_threshold: f64,
    /// Minimum trend ratio for a correlation warning
    pub correlation_trend_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            high_fit_r_squared: 0.90,
            correlation_growth_threshold: 10.0,
            correlation_trend_threshold: 0.5,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.high_fit_r_squared) {
            return Err(DiagError::invalid_config(
                "scoring high_fit_r_squared must be within [0, 1]",
            ));
        }
        if !self.correlation_growth_threshold.is_finite() || self.correlation_growth_threshold < 0.0 {
            return Err(DiagError::invalid_config(
                "scoring correlation_growth_threshold must be a non-negative number",
            ));
        }
        if !(0.0..=1.0).contains(&self.correlation_trend_threshold) {
            return Err(DiagError::invalid_config(
                "scoring correlation_trend_threshold must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Score and band for one series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub score: u8,
    pub confidence: Confidence,
}

struct Band {
    lo: u8,
    hi: u8,
    min_growth: f64,
    min_trend: f64,
}

const HIGH: Band = Band { lo: 85, hi: 95, min_growth: 15.0, min_trend: 0.70 };
const MEDIUM: Band = Band { lo: 60, hi: 70, min_growth: 7.0, min_trend: 0.60 };
const LOW: Band = Band { lo: 35, hi: 40, min_growth: 3.0, min_trend: 0.55 };
const NONE_SCORE: u8 = 10;

/// r² at which a steadily rising series counts as a slow linear leak
const LINEAR_FIT_R_SQUARED: f64 = 0.80;

impl Band {
    fn admits(&self, trend: &TrendResult) -> bool {
        trend.growth_percent >= self.min_growth && trend.trend_ratio >= self.min_trend
    }

    /// How far growth and trend clear the band minimums, in [0, 1]
    fn excess(&self, trend: &TrendResult) -> f64 {
        let growth = ((trend.growth_percent - self.min_growth) / self.min_growth).clamp(0.0, 1.0);
        let rising = ((trend.trend_ratio - self.min_trend) / (1.0 - self.min_trend)).clamp(0.0, 1.0);
        (growth + rising) / 2.0
    }

    fn interpolate(&self, fraction: f64) -> u8 {
        let span = f64::from(self.hi - self.lo);
        let offset = (fraction.clamp(0.0, 1.0) * span).floor() as u8;
        self.lo + offset.min(self.hi - self.lo)
    }
}

/// Score a memory series trend
pub fn score_trend(trend: &TrendResult, config: &ScoringConfig) -> Score {
    if HIGH.admits(trend) && trend.r_squared >= config.high_fit_r_squared {
        return Score {
            score: HIGH.interpolate(HIGH.excess(trend)),
            confidence: Confidence::High,
        };
    }
    if MEDIUM.admits(trend) {
        return Score {
            score: MEDIUM.interpolate(MEDIUM.excess(trend)),
            confidence: Confidence::Medium,
        };
    }
    if LOW.admits(trend) {
        return Score {
            score: LOW.interpolate(LOW.excess(trend)),
            confidence: Confidence::Low,
        };
    }
    if trend.r_squared >= LINEAR_FIT_R_SQUARED && trend.slope > 0.0 {
        let fraction = (trend.r_squared - LINEAR_FIT_R_SQUARED) / (1.0 - LINEAR_FIT_R_SQUARED);
        return Score {
            score: LOW.interpolate(fraction),
            confidence: Confidence::Low,
        };
    }
    Score {
        score: NONE_SCORE,
        confidence: Confidence::None,
    }
}

/// Human-readable explanation of a verdict
///
/// For High and Medium the text says whether unique memory (USS) grows
/// alongside RSS.
pub fn diagnosis(confidence: Confidence, uss: Option<&TrendResult>) -> String {
    let uss_growth = uss.map(|t| t.growth_percent).unwrap_or(0.0);
    let text = match confidence {
        Confidence::High if uss.is_some() && uss_growth >= 10.0 => {
            "RSS and USS both trend upward strongly (likely real retention leak)."
        }
        Confidence::High => "RSS grows strongly with a consistent upward trend.",
        Confidence::Medium if uss.is_some() && uss_growth >= 5.0 => {
            "Moderate RSS and USS growth with an upward trend."
        }
        Confidence::Medium => "Moderate RSS growth trend; verify with a longer capture.",
        Confidence::Low => "Early growth signal detected; capture a longer window to confirm.",
        Confidence::None => "No strong leak pattern in the current capture window.",
    };
    text.to_string()
}

/// Resource accumulating alongside memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceWarning {
    pub resource: String,
    pub growth_percent: f64,
    pub trend_ratio: f64,
    pub message: String,
}

/// Raise a warning when `resource` grows past the correlation thresholds
pub fn correlate(resource: &str, trend: &TrendResult, config: &ScoringConfig) -> Option<ResourceWarning> {
    if trend.growth_percent > config.correlation_growth_threshold
        && trend.trend_ratio >= config.correlation_trend_threshold
    {
        Some(ResourceWarning {
            resource: resource.to_string(),
            growth_percent: trend.growth_percent,
            trend_ratio: trend.trend_ratio,
            message: format!(
                "{} grew {:.1}% ({:.0}% of steps increasing) alongside memory",
                resource,
                trend.growth_percent,
                trend.trend_ratio * 100.0
            ),
        })
    } else {
        None
    }
}
