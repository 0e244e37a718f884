//! Anomaly detection for memory usage patterns
//!
//! This module provides:
//! - Trend fitting (growth, rising-step ratio, least squares fit)
//! - A fixed-capacity sample window
//! - Sliding-window leak detection with per-subject alert cooldown
//! - Fixed memory and swap pressure rules sharing the same cooldown

mod alerter;
mod leak_detector;
mod threshold;
mod trend;
mod window;

pub use alerter::{AlertState, LeakAlert, DEFAULT_COOLDOWN_SECS};
pub use leak_detector::{
    DetectorConfig, DetectorPhase, LeakDetector, TickOutcome, WindowStats, DEFAULT_GROWTH_THRESHOLD,
    DEFAULT_TREND_THRESHOLD, DEFAULT_WINDOW_SIZE,
};
pub use threshold::{
    ThresholdAlert, ThresholdConfig, ThresholdRule, ThresholdRules, ThresholdStates,
    DEFAULT_MEMORY_CRITICAL_PERCENT, DEFAULT_MEMORY_PERCENT, DEFAULT_SWAP_PERCENT,
};
pub use trend::{growth_percent, linear_fit, trend_ratio, TrendResult};
pub use window::Window;
