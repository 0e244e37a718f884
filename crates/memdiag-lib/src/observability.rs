//! Observability infrastructure
//!
//! Provides:
//! - Prometheus metrics for the watch loop, leak verdicts and OOM parsing
//! - Structured event logging with tracing

use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::{info, warn};

use crate::anomaly::{LeakAlert, ThresholdAlert, TrendResult};
use crate::models::Subject;

/// Metrics registry owned by one memdiag invocation
#[derive(Clone)]
pub struct DiagMetrics {
    registry: Registry,
    memory_reading: GaugeVec,
    growth_percent: GaugeVec,
    trend_ratio: GaugeVec,
    slope: GaugeVec,
    leak_score: GaugeVec,
    swap_percent: Gauge,
    ticks: IntCounterVec,
    samples_skipped: IntCounterVec,
    alerts_fired: IntCounterVec,
    threshold_alerts: IntCounterVec,
    oom_events: IntCounterVec,
}

impl DiagMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("memdiag".to_string()), None)?;

        let memory_reading = GaugeVec::new(
            Opts::new("memory_reading", "Latest memory reading per subject (percent for system, bytes for a process)"),
            &["subject"],
        )?;
        let growth_percent = GaugeVec::new(
            Opts::new("window_growth_percent", "Relative growth across the detector window"),
            &["subject"],
        )?;
        let trend_ratio = GaugeVec::new(
            Opts::new("window_trend_ratio", "Fraction of rising steps in the detector window"),
            &["subject"],
        )?;
        let slope = GaugeVec::new(
            Opts::new("window_slope", "Least squares slope per sample in the detector window"),
            &["subject"],
        )?;
        let leak_score = GaugeVec::new(
            Opts::new("leak_score", "Leak score from the last deep analysis"),
            &["subject"],
        )?;
        let swap_percent = Gauge::with_opts(Opts::new(
            "swap_percent",
            "Used swap in percent of total, when swap is configured",
        ))?;
        let ticks = IntCounterVec::new(
            Opts::new("ticks_total", "Monitoring ticks processed"),
            &["subject"],
        )?;
        let samples_skipped = IntCounterVec::new(
            Opts::new("samples_skipped_total", "Ticks whose sample could not be read"),
            &["subject"],
        )?;
        let alerts_fired = IntCounterVec::new(
            Opts::new("leak_alerts_total", "Leak alerts emitted by the sliding-window detector"),
            &["subject"],
        )?;
        let threshold_alerts = IntCounterVec::new(
            Opts::new("threshold_alerts_total", "Memory and swap limit alerts per rule"),
            &["rule"],
        )?;
        let oom_events = IntCounterVec::new(
            Opts::new("oom_events_total", "OOM kill events parsed per log source"),
            &["source"],
        )?;

        registry.register(Box::new(memory_reading.clone()))?;
        registry.register(Box::new(growth_percent.clone()))?;
        registry.register(Box::new(trend_ratio.clone()))?;
        registry.register(Box::new(slope.clone()))?;
        registry.register(Box::new(leak_score.clone()))?;
        registry.register(Box::new(swap_percent.clone()))?;
        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(samples_skipped.clone()))?;
        registry.register(Box::new(alerts_fired.clone()))?;
        registry.register(Box::new(threshold_alerts.clone()))?;
        registry.register(Box::new(oom_events.clone()))?;

        Ok(Self {
            registry,
            memory_reading,
            growth_percent,
            trend_ratio,
            slope,
            leak_score,
            swap_percent,
            ticks,
            samples_skipped,
            alerts_fired,
            threshold_alerts,
            oom_events,
        })
    }

    /// Record one processed tick
    pub fn observe_tick(&self, subject: &Subject, reading: f64, trend: Option<&TrendResult>) {
        let label = subject.to_string();
        self.ticks.with_label_values(&[&label]).inc();
        self.memory_reading.with_label_values(&[&label]).set(reading);
        if let Some(trend) = trend {
            self.growth_percent
                .with_label_values(&[&label])
                .set(trend.growth_percent);
            self.trend_ratio.with_label_values(&[&label]).set(trend.trend_ratio);
            self.slope.with_label_values(&[&label]).set(trend.slope);
        }
    }

    pub fn inc_samples_skipped(&self, subject: &Subject) {
        let label = subject.to_string();
        self.ticks.with_label_values(&[&label]).inc();
        self.samples_skipped.with_label_values(&[&label]).inc();
    }

    pub fn inc_alerts_fired(&self, subject: &Subject) {
        self.alerts_fired
            .with_label_values(&[&subject.to_string()])
            .inc();
    }

    pub fn set_swap_percent(&self, percent: f64) {
        self.swap_percent.set(percent);
    }

    pub fn inc_threshold_alerts(&self, rule: &str) {
        self.threshold_alerts.with_label_values(&[rule]).inc();
    }

    pub fn set_leak_score(&self, subject: &str, score: u8) {
        self.leak_score
            .with_label_values(&[subject])
            .set(f64::from(score));
    }

    pub fn add_oom_events(&self, source: &str, count: usize) {
        self.oom_events
            .with_label_values(&[source])
            .inc_by(count as u64);
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for diagnostic events
///
/// Provides consistent event-shaped logging for alerts, verdicts and
/// degraded log sources.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_watch_started(&self, subject: &Subject, interval_secs: f64, window_size: usize) {
        info!(
            event = "watch_started",
            node = %self.node_name,
            subject = %subject,
            interval_secs = interval_secs,
            window_size = window_size,
            "Memory watch started"
        );
    }

    pub fn log_watch_stopped(&self, subject: &Subject, ticks: u64, alerts_fired: u64, reason: &str) {
        info!(
            event = "watch_stopped",
            node = %self.node_name,
            subject = %subject,
            ticks = ticks,
            alerts_fired = alerts_fired,
            reason = %reason,
            "Memory watch stopped"
        );
    }

    pub fn log_leak_alert(&self, alert: &LeakAlert) {
        warn!(
            event = "leak_alert_fired",
            node = %self.node_name,
            subject = %alert.subject,
            growth_percent = alert.growth_percent,
            trend_ratio = alert.trend_ratio,
            slope = alert.slope,
            r_squared = alert.r_squared,
            "Potential memory leak detected"
        );
    }

    pub fn log_threshold_alert(&self, alert: &ThresholdAlert) {
        warn!(
            event = "threshold_alert_fired",
            node = %self.node_name,
            rule = %alert.rule,
            value = alert.value,
            threshold = alert.threshold,
            "{}",
            alert.message()
        );
    }

    pub fn log_alert_cleared(&self, subject: &Subject) {
        info!(
            event = "leak_alert_cleared",
            node = %self.node_name,
            subject = %subject,
            "Leak condition no longer holds"
        );
    }

    pub fn log_sample_skipped(&self, subject: &Subject, reason: &str) {
        info!(
            event = "sample_skipped",
            node = %self.node_name,
            subject = %subject,
            reason = %reason,
            "Sample unavailable, tick skipped"
        );
    }

    pub fn log_leak_verdict(&self, subject: &str, score: u8, confidence: &str, samples: usize, partial: bool) {
        info!(
            event = "leak_verdict",
            node = %self.node_name,
            subject = %subject,
            score = score,
            confidence = %confidence,
            samples = samples,
            partial = partial,
            "Leak analysis complete"
        );
    }

    pub fn log_oom_source_unavailable(&self, source: &str, reason: &str) {
        warn!(
            event = "oom_source_unavailable",
            node = %self.node_name,
            source = %source,
            reason = %reason,
            "OOM log source unavailable, continuing with remaining sources"
        );
    }

    pub fn log_oom_summary(&self, total_events: usize, most_killed: Option<&str>) {
        info!(
            event = "oom_summary",
            node = %self.node_name,
            total_events = total_events,
            most_killed = ?most_killed,
            "OOM log analysis complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_exposition() {
        let metrics = DiagMetrics::new().unwrap();
        let subject = Subject::System;
        let trend = TrendResult::fit(&[10.0, 12.0, 14.0]);

        metrics.observe_tick(&subject, 14.0, Some(&trend));
        metrics.inc_samples_skipped(&subject);
        metrics.inc_alerts_fired(&subject);
        metrics.add_oom_events("kernel", 2);
        metrics.set_leak_score("pid 12", 88);
        metrics.set_swap_percent(12.5);
        metrics.inc_threshold_alerts("high_swap");

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("memdiag_ticks_total{subject=\"system\"} 2"));
        assert!(text.contains("memdiag_samples_skipped_total{subject=\"system\"} 1"));
        assert!(text.contains("memdiag_leak_alerts_total{subject=\"system\"} 1"));
        assert!(text.contains("memdiag_oom_events_total{source=\"kernel\"} 2"));
        assert!(text.contains("memdiag_leak_score{subject=\"pid 12\"} 88"));
        assert!(text.contains("memdiag_swap_percent 12.5"));
        assert!(text.contains("memdiag_threshold_alerts_total{rule=\"high_swap\"} 1"));
    }

    #[test]
    fn test_independent_registries() {
        // Private registries never collide on registration
        let a = DiagMetrics::new().unwrap();
        let b = DiagMetrics::new().unwrap();
        a.inc_alerts_fired(&Subject::System);
        assert!(!b.encode_text().unwrap().contains("leak_alerts_total{"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
