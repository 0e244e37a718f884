//! Leak alert state and emission
//!
//! Each monitored subject owns one [`AlertState`]. The detector flips it
//! between quiescent and alerting and consults it before emitting, so a
//! sustained leak produces one alert per cooldown interval.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::TrendResult;
use crate::models::Subject;

/// Default cooldown between two alerts for the same subject (5 minutes)
pub const DEFAULT_COOLDOWN_SECS: u64 = 5 * 60;

/// Alert raised by the sliding-window detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakAlert {
    pub subject: Subject,
    pub growth_percent: f64,
    pub trend_ratio: f64,
    /// Units per sample (percentage points for the system, bytes for a process)
    pub slope: f64,
    pub r_squared: f64,
    /// Latest value in the window
    pub current_value: f64,
    pub window_samples: usize,
    pub timestamp: DateTime<Utc>,
}

impl LeakAlert {
    pub(crate) fn from_trend(subject: Subject, trend: &TrendResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            subject,
            growth_percent: trend.growth_percent,
            trend_ratio: trend.trend_ratio,
            slope: trend.slope,
            r_squared: trend.r_squared,
            current_value: trend.end,
            window_samples: trend.samples,
            timestamp,
        }
    }

    /// Human-readable one-line summary
    pub fn message(&self) -> String {
        let unit = match self.subject {
            Subject::System => "%",
            Subject::Process { .. } => " B",
        };
        format!(
            "Potential memory leak on {}: +{:.1}% over {} samples ({:.0}% of steps increasing, slope {:.2}{}/sample)",
            self.subject,
            self.growth_percent,
            self.window_samples,
            self.trend_ratio * 100.0,
            self.slope,
            unit
        )
    }
}

/// Per-subject alert state, owned by the monitoring loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub subject: Subject,
    /// Whether the leak condition currently holds
    pub active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub alerts_fired: u64,
}

impl AlertState {
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            active: false,
            last_fired_at: None,
            alerts_fired: 0,
        }
    }

    /// Check if an alert should be suppressed at `now`
    ///
    /// A wall clock that stepped backwards since the last alert counts as
    /// the cooldown having elapsed.
    pub fn should_suppress(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_fired_at {
            None => false,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed < cooldown,
                Err(_) => false,
            },
        }
    }

    /// Record that an alert was emitted
    pub fn record_alert(&mut self, now: DateTime<Utc>) {
        self.last_fired_at = Some(now);
        self.alerts_fired += 1;
    }
}
