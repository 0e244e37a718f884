//! Sliding-window memory leak detection
//!
//! Keeps the last N readings of a subject in a [`Window`], fits a trend once
//! the window holds enough samples, and raises a leak condition when growth
//! and the fraction of rising steps both clear their thresholds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alerter::{AlertState, LeakAlert, DEFAULT_COOLDOWN_SECS};
use super::{TrendResult, Window};
use crate::error::{DiagError, Result};

/// Default number of samples kept per subject
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Default relative growth, in percent, across the window
pub const DEFAULT_GROWTH_THRESHOLD: f64 = 5.0;

/// Fraction of rising steps required to call the growth a trend
pub const DEFAULT_TREND_THRESHOLD: f64 = 0.60;

/// Detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub window_size: usize,
    /// Samples required before evaluating; defaults to `window_size`
    pub min_samples: Option<usize>,
    pub growth_threshold: f64,
    pub trend_threshold: f64,
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            min_samples: None,
            growth_threshold: DEFAULT_GROWTH_THRESHOLD,
            trend_threshold: DEFAULT_TREND_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

impl DetectorConfig {
    pub fn min_samples(&self) -> usize {
        self.min_samples.unwrap_or(self.window_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(DiagError::invalid_config("detector window size must be >= 2"));
        }
        let min = self.min_samples();
        if min < 2 || min > self.window_size {
            return Err(DiagError::invalid_config(format!(
                "detector min samples must be between 2 and the window size ({}), got {}",
                self.window_size, min
            )));
        }
        if !self.growth_threshold.is_finite() || self.growth_threshold < 0.0 {
            return Err(DiagError::invalid_config(
                "detector growth threshold must be a non-negative number",
            ));
        }
        if !(0.0..=1.0).contains(&self.trend_threshold) {
            return Err(DiagError::invalid_config(
                "detector trend threshold must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Detector phase for one subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorPhase {
    Quiescent,
    Alerting,
}

/// What happened on one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Phase after the tick
    pub phase: DetectorPhase,
    /// Whether a sample was written to the window
    pub recorded: bool,
    /// Trend over the window, when it was evaluated
    pub trend: Option<TrendResult>,
    /// Alert emitted on this tick
    pub alert: Option<LeakAlert>,
    /// The leak condition stopped holding on this tick
    pub cleared: bool,
}

/// Summary of the values currently held in a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub growth: f64,
    pub slope: f64,
}

/// Sliding-window leak detector
///
/// Stateless apart from its configuration: the window and alert state
/// belong to the caller and are passed into every [`LeakDetector::tick`].
#[derive(Debug, Clone)]
pub struct LeakDetector {
    config: DetectorConfig,
}

impl LeakDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Allocate a window sized for this detector
    pub fn new_window(&self) -> Window<f64> {
        Window::new(self.config.window_size)
    }

    /// Process one monitoring tick
    ///
    /// A missing or non-finite reading is skipped without touching the window.
    pub fn tick(
        &self,
        window: &mut Window<f64>,
        state: &mut AlertState,
        reading: Option<f64>,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let phase = Self::phase_of(state);

        let Some(value) = reading.filter(|v| v.is_finite()) else {
            return TickOutcome {
                phase,
                recorded: false,
                trend: None,
                alert: None,
                cleared: false,
            };
        };

        window.push(value);

        if window.len() < self.config.min_samples() {
            return TickOutcome {
                phase,
                recorded: true,
                trend: None,
                alert: None,
                cleared: false,
            };
        }

        let trend = TrendResult::fit(&window.to_vec());
        let leaking = trend.exceeds(self.config.growth_threshold, self.config.trend_threshold);

        let mut alert = None;
        let mut cleared = false;

        if leaking {
            state.active = true;
            if !state.should_suppress(now, self.config.cooldown) {
                state.record_alert(now);
                alert = Some(LeakAlert::from_trend(state.subject, &trend, now));
            }
        } else if state.active {
            state.active = false;
            cleared = true;
        }

        TickOutcome {
            phase: Self::phase_of(state),
            recorded: true,
            trend: Some(trend),
            alert,
            cleared,
        }
    }

    /// Current statistics for a window
    pub fn stats(window: &Window<f64>) -> WindowStats {
        let values = window.to_vec();
        let Some(&current) = values.last() else {
            return WindowStats::default();
        };
        let trend = TrendResult::fit(&values);
        WindowStats {
            samples: values.len(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            current,
            growth: trend.delta,
            slope: trend.slope,
        }
    }

    fn phase_of(state: &AlertState) -> DetectorPhase {
        if state.active {
            DetectorPhase::Alerting
        } else {
            DetectorPhase::Quiescent
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
