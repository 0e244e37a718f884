//! Memory watch loop
//!
//! Periodically reads one subject (the system or a single process), feeds
//! the reading into the sliding-window [`LeakDetector`] and forwards what
//! happened on each tick over a channel. System readings are also checked
//! against the fixed memory and swap [`ThresholdRules`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{read_subject, SampleSource};
use crate::anomaly::{
    AlertState, DetectorConfig, DetectorPhase, LeakAlert, LeakDetector, ThresholdAlert,
    ThresholdConfig, ThresholdRules, ThresholdStates, TrendResult, Window, WindowStats,
};
use crate::error::{DiagError, Result};
use crate::models::{Subject, SystemMemory};
use crate::observability::{DiagMetrics, StructuredLogger};
use crate::shutdown::Shutdown;

/// Configuration for the watch loop
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Time between ticks (default: 5 seconds)
    pub interval: Duration,
    /// Stop after this many ticks; run until shutdown when `None`
    pub count: Option<u64>,
    /// Channel buffer size for tick events
    pub buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            count: None,
            buffer_size: 256,
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(DiagError::invalid_config("watch interval must be greater than zero"));
        }
        if self.count == Some(0) {
            return Err(DiagError::invalid_config("watch count must be at least 1"));
        }
        Ok(())
    }
}

/// Something that happened on one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    /// A reading was recorded
    Sample {
        subject: Subject,
        timestamp: DateTime<Utc>,
        value: f64,
        phase: DetectorPhase,
        stats: WindowStats,
        /// Present once the window holds enough samples
        trend: Option<TrendResult>,
    },
    /// The reading could not be taken; the window is untouched
    Skipped {
        subject: Subject,
        timestamp: DateTime<Utc>,
        reason: String,
    },
    Alert(LeakAlert),
    /// A memory or swap limit was exceeded
    Threshold(ThresholdAlert),
    Cleared {
        subject: Subject,
        timestamp: DateTime<Utc>,
    },
}

/// Totals reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub ticks: u64,
    pub recorded: u64,
    pub skipped: u64,
    /// Leak and threshold alerts together
    pub alerts_fired: u64,
    pub threshold_alerts: u64,
    /// Stopped by the shutdown signal rather than the tick count
    pub interrupted: bool,
}

/// Watch loop for a single subject
pub struct WatchLoop {
    source: Arc<dyn SampleSource>,
    detector: LeakDetector,
    thresholds: ThresholdRules,
    subject: Subject,
    config: WatchConfig,
    events_tx: mpsc::Sender<WatchEvent>,
    metrics: Option<DiagMetrics>,
    logger: StructuredLogger,
}

impl WatchLoop {
    /// Create a new watch loop
    pub fn new(
        source: Arc<dyn SampleSource>,
        detector: LeakDetector,
        thresholds: ThresholdRules,
        subject: Subject,
        config: WatchConfig,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.buffer_size.max(1));

        let loop_instance = Self {
            source,
            detector,
            thresholds,
            subject,
            config,
            events_tx,
            metrics: None,
            logger,
        };

        (loop_instance, events_rx)
    }

    pub fn with_metrics(mut self, metrics: DiagMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until the tick count is reached or shutdown is requested
    ///
    /// No sample is recorded once shutdown has been observed.
    pub async fn run(self, mut shutdown: Shutdown) -> WatchSummary {
        self.logger.log_watch_started(
            &self.subject,
            self.config.interval.as_secs_f64(),
            self.detector.config().window_size,
        );

        let mut window = self.detector.new_window();
        let mut state = AlertState::new(self.subject);
        let mut threshold_states = ThresholdStates::new();
        let mut summary = WatchSummary::default();

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.config.count.is_some_and(|count| summary.ticks >= count) {
                break;
            }

            let ticked = tokio::select! {
                biased;
                _ = shutdown.triggered() => false,
                _ = ticker.tick() => true,
            };
            if !ticked {
                summary.interrupted = true;
                break;
            }

            let reading = read_subject(self.source.as_ref(), &self.subject).await;
            if shutdown.is_triggered() {
                summary.interrupted = true;
                break;
            }

            let mut states = TickStates {
                window: &mut window,
                leak: &mut state,
                thresholds: &mut threshold_states,
            };
            self.process_tick(&mut states, reading, Utc::now(), &mut summary)
                .await;
        }

        summary.threshold_alerts = threshold_states.alerts_fired();
        summary.alerts_fired = state.alerts_fired + summary.threshold_alerts;
        let reason = if summary.interrupted { "shutdown" } else { "count reached" };
        self.logger
            .log_watch_stopped(&self.subject, summary.ticks, summary.alerts_fired, reason);

        summary
    }

    async fn process_tick(
        &self,
        states: &mut TickStates<'_>,
        reading: Result<(f64, Option<SystemMemory>)>,
        now: DateTime<Utc>,
        summary: &mut WatchSummary,
    ) {
        summary.ticks += 1;

        let (value, system) = match reading {
            Ok(reading) => reading,
            Err(e) => {
                if !e.is_transient() {
                    warn!(subject = %self.subject, error = %e, "Unexpected sampling error, skipping tick");
                }
                summary.skipped += 1;
                let reason = e.to_string();
                self.logger.log_sample_skipped(&self.subject, &reason);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_samples_skipped(&self.subject);
                }
                self.emit(WatchEvent::Skipped {
                    subject: self.subject,
                    timestamp: now,
                    reason,
                })
                .await;
                return;
            }
        };

        let window = &mut *states.window;
        let outcome = self.detector.tick(window, states.leak, Some(value), now);
        if !outcome.recorded {
            summary.skipped += 1;
            if let Some(metrics) = &self.metrics {
                metrics.inc_samples_skipped(&self.subject);
            }
            self.emit(WatchEvent::Skipped {
                subject: self.subject,
                timestamp: now,
                reason: format!("non-finite reading {}", value),
            })
            .await;
            return;
        }
        summary.recorded += 1;

        if let Some(metrics) = &self.metrics {
            metrics.observe_tick(&self.subject, value, outcome.trend.as_ref());
            if let Some(swap) = system.and_then(|m| m.swap_percent) {
                metrics.set_swap_percent(swap);
            }
        }

        debug!(
            subject = %self.subject,
            value = value,
            window = window.len(),
            phase = ?outcome.phase,
            "Tick recorded"
        );

        self.emit(WatchEvent::Sample {
            subject: self.subject,
            timestamp: now,
            value,
            phase: outcome.phase,
            stats: LeakDetector::stats(window),
            trend: outcome.trend,
        })
        .await;

        if let Some(alert) = outcome.alert {
            self.logger.log_leak_alert(&alert);
            if let Some(metrics) = &self.metrics {
                metrics.inc_alerts_fired(&self.subject);
            }
            self.emit(WatchEvent::Alert(alert)).await;
        }

        if outcome.cleared {
            self.logger.log_alert_cleared(&self.subject);
            self.emit(WatchEvent::Cleared {
                subject: self.subject,
                timestamp: now,
            })
            .await;
        }

        if let Some(memory) = system {
            for alert in self.thresholds.check(states.thresholds, &memory, now) {
                self.logger.log_threshold_alert(&alert);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_threshold_alerts(alert.rule.as_str());
                }
                self.emit(WatchEvent::Threshold(alert)).await;
            }
        }
    }

    async fn emit(&self, event: WatchEvent) {
        if let Err(e) = self.events_tx.send(event).await {
            debug!(error = %e, "Watch event receiver dropped");
        }
    }
}

/// Mutable per-subject state threaded through one tick
struct TickStates<'a> {
    window: &'a mut Window<f64>,
    leak: &'a mut AlertState,
    thresholds: &'a mut ThresholdStates,
}

/// Builder for creating the watch loop
pub struct WatchLoopBuilder {
    source: Option<Arc<dyn SampleSource>>,
    subject: Subject,
    detector: DetectorConfig,
    thresholds: ThresholdConfig,
    config: WatchConfig,
    metrics: Option<DiagMetrics>,
    logger: StructuredLogger,
}

impl WatchLoopBuilder {
    /// Create a new builder watching the system with default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            subject: Subject::System,
            detector: DetectorConfig::default(),
            thresholds: ThresholdConfig::default(),
            config: WatchConfig::default(),
            metrics: None,
            logger: StructuredLogger::new("localhost"),
        }
    }

    /// Set the sample source
    pub fn source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the monitored subject
    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Set the detector tuning
    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.detector = detector;
        self
    }

    /// Set the memory and swap limits checked on system readings
    pub fn thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the tick count limit
    pub fn count(mut self, count: Option<u64>) -> Self {
        self.config.count = count;
        self
    }

    /// Attach a metrics registry
    pub fn metrics(mut self, metrics: DiagMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the structured logger
    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Build the watch loop, validating the configuration
    pub fn build(self) -> Result<(WatchLoop, mpsc::Receiver<WatchEvent>)> {
        let source = self
            .source
            .ok_or_else(|| DiagError::invalid_config("watch loop requires a sample source"))?;
        self.config.validate()?;
        let detector = LeakDetector::new(self.detector)?;
        let thresholds = ThresholdRules::new(self.thresholds)?;

        let (watch_loop, rx) = WatchLoop::new(
            source,
            detector,
            thresholds,
            self.subject,
            self.config,
            self.logger,
        );
        let watch_loop = match self.metrics {
            Some(metrics) => watch_loop.with_metrics(metrics),
            None => watch_loop,
        };
        Ok((watch_loop, rx))
    }
}

impl Default for WatchLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
