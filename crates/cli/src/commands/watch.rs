//! `memdiag watch`: stream memory readings through the leak detector

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use memdiag_lib::anomaly::ThresholdRule;
use memdiag_lib::collector::{create_source, WatchEvent, WatchLoopBuilder};
use memdiag_lib::{DiagMetrics, Shutdown, StructuredLogger, Subject};

use crate::config::{secs_to_duration, Settings};
use crate::output::{format_bytes, format_ratio, info, success, warning, Output, WatchFormat};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Seconds between samples (default from config, 5)
    #[arg(long, short)]
    pub interval: Option<f64>,

    /// Stop after this many samples; exit code 1 if any alert fired
    #[arg(long, short = 'n')]
    pub count: Option<u64>,

    /// Watch one process's RSS instead of system memory
    #[arg(long, short)]
    pub pid: Option<u32>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: WatchFormat,

    /// Append output to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub async fn run(settings: &Settings, args: WatchArgs, shutdown: Shutdown) -> Result<ExitCode> {
    let interval = match args.interval {
        Some(secs) => secs_to_duration(secs, "--interval")?,
        None => settings.watch_interval()?,
    };
    let subject = args
        .pid
        .map(|pid| Subject::Process { pid })
        .unwrap_or(Subject::System);
    let detector = settings.detector.to_config()?;
    let window_size = detector.window_size;

    let metrics = DiagMetrics::new().context("Failed to create metrics registry")?;
    let (watch_loop, mut events) = WatchLoopBuilder::new()
        .source(create_source(&settings.proc_root))
        .subject(subject)
        .detector(detector)
        .thresholds(settings.alerts.to_config()?)
        .interval(interval)
        .count(args.count)
        .metrics(metrics.clone())
        .logger(StructuredLogger::new(settings.node_name.clone()))
        .build()?;

    let mut output = Output::open(args.output.as_deref())?;
    if args.format == WatchFormat::Table {
        output.emit(&info(&format!(
            "Watching {} every {:.1}s (window {} samples), Ctrl+C to stop",
            subject,
            interval.as_secs_f64(),
            window_size
        )))?;
    }

    let handle = tokio::spawn(watch_loop.run(shutdown));

    while let Some(event) = events.recv().await {
        match args.format {
            WatchFormat::Table => output.emit(&render_line(&event, window_size))?,
            WatchFormat::Json => {
                output.emit(&serde_json::to_string(&event).context("Failed to serialize event")?)?
            }
            WatchFormat::Prometheus => {
                if matches!(event, WatchEvent::Sample { .. } | WatchEvent::Skipped { .. }) {
                    output.emit(&metrics.encode_text().context("Failed to encode metrics")?)?;
                }
            }
        }
    }

    let summary = handle.await.context("Watch loop task failed")?;

    if args.format == WatchFormat::Table {
        output.emit(&info(&format!(
            "{} ticks, {} recorded, {} skipped, {} alert(s)",
            summary.ticks, summary.recorded, summary.skipped, summary.alerts_fired
        )))?;
    }

    if args.count.is_some() && summary.alerts_fired > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn format_value(subject: &Subject, value: f64) -> String {
    match subject {
        Subject::System => format!("{:.2}%", value),
        Subject::Process { .. } => format_bytes(value.max(0.0) as u64),
    }
}

fn render_line(event: &WatchEvent, window_size: usize) -> String {
    match event {
        WatchEvent::Sample {
            subject,
            timestamp,
            value,
            stats,
            trend,
            ..
        } => {
            let status = match trend {
                Some(trend) => format!(
                    "growth {:+.2}%  rising {}  r² {:.2}",
                    trend.growth_percent,
                    format_ratio(trend.trend_ratio),
                    trend.r_squared
                ),
                None => format!("collecting {}/{}", stats.samples, window_size)
                    .dimmed()
                    .to_string(),
            };
            format!(
                "{}  {:<10} {:>12}  {}",
                timestamp.format("%H:%M:%S"),
                subject.to_string(),
                format_value(subject, *value),
                status
            )
        }
        WatchEvent::Skipped {
            subject,
            timestamp,
            reason,
        } => format!(
            "{}  {:<10} {}",
            timestamp.format("%H:%M:%S"),
            subject.to_string(),
            format!("skipped: {}", reason).dimmed()
        ),
        WatchEvent::Alert(alert) => warning(&alert.message()),
        WatchEvent::Threshold(alert) => match alert.rule {
            ThresholdRule::CriticalMemory => alert.message().red().bold().to_string(),
            _ => warning(&alert.message()),
        },
        WatchEvent::Cleared { subject, .. } => {
            success(&format!("Leak condition cleared on {}", subject))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memdiag_lib::anomaly::ThresholdAlert;

    #[test]
    fn test_render_collecting_line() {
        colored::control::set_override(false);
        let event = WatchEvent::Skipped {
            subject: Subject::Process { pid: 7 },
            timestamp: Utc::now(),
            reason: "process exited".to_string(),
        };
        let line = render_line(&event, 10);
        assert!(line.contains("pid 7"));
        assert!(line.contains("skipped: process exited"));
    }

    #[test]
    fn test_render_threshold_alert() {
        colored::control::set_override(false);
        let event = WatchEvent::Threshold(ThresholdAlert {
            rule: ThresholdRule::HighSwap,
            value: 62.4,
            threshold: 50.0,
            timestamp: Utc::now(),
        });
        assert!(render_line(&event, 10).contains("Swap usage is above 50% (62.4%)"));
    }

    #[test]
    fn test_format_value_units() {
        assert_eq!(format_value(&Subject::System, 42.5), "42.50%");
        assert_eq!(
            format_value(&Subject::Process { pid: 1 }, 2.0 * 1024.0 * 1024.0),
            "2.00Mi"
        );
    }
}
