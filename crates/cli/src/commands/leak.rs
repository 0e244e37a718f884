//! `memdiag leak`: per-process leak reports, top-candidate ranking and
//! allocation-stream ranking

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use memdiag_lib::anomaly::TrendResult;
use memdiag_lib::collector::create_source;
use memdiag_lib::report::{
    parse_snapshots, rank_allocations, GroupBy, LeakOutcome, LeakReport, LeakReportEngine,
    RankedAllocation, SamplingPlan, TopCandidateRanker, TopRanking,
};
use memdiag_lib::{DiagError, Shutdown, StructuredLogger};
use tabled::Tabled;

use crate::config::{secs_to_duration, Settings};
use crate::output::{
    color_confidence, format_byte_delta, format_bytes, format_percent, format_ratio, info, table,
    warning, Output, OutputFormat,
};

#[derive(Debug, Args)]
pub struct LeakArgs {
    /// Process ID to analyze, or `top` to rank the heaviest processes
    pub target: Option<String>,

    /// Sampling interval in seconds
    #[arg(long, short, default_value_t = 2.0)]
    pub interval: f64,

    /// Number of samples
    #[arg(long, short = 'n', default_value_t = 30)]
    pub count: usize,

    /// Number of candidates to rank (top mode and allocation ranking)
    #[arg(long, short, default_value_t = 5)]
    pub limit: usize,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Append output to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Rank keys of a JSON-lines allocation snapshot stream instead of sampling
    #[arg(long, conflicts_with = "target")]
    pub allocations: Option<PathBuf>,

    /// Allocation grouping: location or type
    #[arg(long, default_value = "location", requires = "allocations")]
    pub group_by: String,
}

enum Target {
    Pid(u32),
    Top,
}

fn parse_target(target: Option<&str>) -> Result<Target, DiagError> {
    match target {
        Some("top") => Ok(Target::Top),
        Some(raw) => raw.parse::<u32>().map(Target::Pid).map_err(|_| {
            DiagError::invalid_config(format!("leak target must be a pid or 'top', got '{}'", raw))
        }),
        None => Err(DiagError::invalid_config(
            "leak requires a pid, 'top' or --allocations FILE",
        )),
    }
}

pub async fn run(settings: &Settings, args: LeakArgs, shutdown: Shutdown) -> Result<()> {
    if let Some(path) = &args.allocations {
        return run_allocations(settings, &args, path);
    }

    let target = parse_target(args.target.as_deref())?;
    let plan = SamplingPlan::new(args.count, secs_to_duration(args.interval, "--interval")?)?;
    if matches!(target, Target::Top) && args.limit == 0 {
        return Err(DiagError::invalid_config("--limit must be >= 1").into());
    }

    let mut output = Output::open(args.output.as_deref())?;
    let engine = LeakReportEngine::new(
        create_source(&settings.proc_root),
        settings.scoring.clone(),
        StructuredLogger::new(settings.node_name.clone()),
    );

    match target {
        Target::Pid(pid) => {
            if args.format == OutputFormat::Table {
                eprintln!(
                    "{}",
                    info(&format!(
                        "Sampling pid {} {} times every {:.2}s...",
                        pid, plan.count, args.interval
                    ))
                );
            }
            let report = engine.analyze(pid, &plan, shutdown).await?;
            match args.format {
                OutputFormat::Json => output.emit_json(&report)?,
                OutputFormat::Table => output.emit(&render_report(&report))?,
            }
        }
        Target::Top => {
            if args.format == OutputFormat::Table {
                eprintln!(
                    "{}",
                    info(&format!(
                        "Sampling the top {} processes by RSS, {} samples every {:.2}s...",
                        args.limit, plan.count, args.interval
                    ))
                );
            }
            let ranker = TopCandidateRanker::new(Arc::new(engine));
            let ranking = ranker.rank(args.limit, &plan, shutdown).await?;
            match args.format {
                OutputFormat::Json => output.emit_json(&ranking)?,
                OutputFormat::Table => output.emit(&render_ranking(&ranking, &plan))?,
            }
        }
    }

    Ok(())
}

fn run_allocations(settings: &Settings, args: &LeakArgs, path: &std::path::Path) -> Result<()> {
    let group_by: GroupBy = args.group_by.parse()?;
    if args.limit == 0 {
        return Err(DiagError::invalid_config("--limit must be >= 1").into());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read allocation stream {}", path.display()))?;
    let snapshots = parse_snapshots(&content)?;
    let ranked = rank_allocations(&snapshots, group_by, args.limit, &settings.scoring)?;

    let mut output = Output::open(args.output.as_deref())?;
    match args.format {
        OutputFormat::Json => output.emit_json(&ranked)?,
        OutputFormat::Table => output.emit(&render_allocations(&ranked, group_by, snapshots.len()))?,
    }
    Ok(())
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Growth")]
    growth: String,
    #[tabled(rename = "Growth %")]
    growth_percent: String,
    #[tabled(rename = "Rising")]
    rising: String,
    #[tabled(rename = "R²")]
    r_squared: String,
}

impl MetricRow {
    fn bytes(metric: &str, trend: &TrendResult) -> Self {
        Self {
            metric: metric.to_string(),
            start: format_bytes(trend.start.max(0.0) as u64),
            end: format_bytes(trend.end.max(0.0) as u64),
            growth: format_byte_delta(trend.delta),
            growth_percent: format_percent(trend.growth_percent),
            rising: format_ratio(trend.trend_ratio),
            r_squared: format!("{:.2}", trend.r_squared),
        }
    }

    fn count(metric: &str, trend: &TrendResult) -> Self {
        Self {
            metric: metric.to_string(),
            start: format!("{}", trend.start as i64),
            end: format!("{}", trend.end as i64),
            growth: format!("{:+}", trend.delta as i64),
            growth_percent: format_percent(trend.growth_percent),
            rising: format_ratio(trend.trend_ratio),
            r_squared: format!("{:.2}", trend.r_squared),
        }
    }
}

fn render_report(report: &LeakReport) -> String {
    let mut lines = vec![
        format!(
            "{} {} ({})",
            "Memory Leak Report: PID".bold(),
            report.pid().to_string().bold(),
            display_name(&report.identity.name).cyan()
        ),
        "=".repeat(60),
    ];
    if !report.identity.cmdline.is_empty() {
        lines.push(format!("Command:  {}", truncate(&report.identity.cmdline, 120)));
    }
    lines.push(format!(
        "Samples:  {} of {} | Interval: {:.2}s | Duration: {:.2}s",
        report.samples.len(),
        report.requested_samples,
        report.interval_seconds,
        report.duration_seconds
    ));
    if report.partial {
        lines.push(warning(&format!(
            "Sampling stopped early: {}",
            report.stop_reason.as_deref().unwrap_or("unknown reason")
        )));
    }

    let verdict = match &report.outcome {
        LeakOutcome::Verdict(verdict) => verdict,
        LeakOutcome::InsufficientData { samples_collected } => {
            lines.push(warning(&format!(
                "Insufficient data: {} sample(s) collected, at least 2 required",
                samples_collected
            )));
            return lines.join("\n");
        }
    };

    lines.push(format!(
        "Score:    {}/100 ({})",
        verdict.score,
        color_confidence(verdict.confidence)
    ));
    lines.push(format!("Diagnosis: {}", verdict.diagnosis));
    lines.push(String::new());

    let mut rows = vec![MetricRow::bytes("RSS", &verdict.rss)];
    if let Some(uss) = &verdict.uss {
        rows.push(MetricRow::bytes("USS", uss));
    }
    if let Some(pss) = &verdict.pss {
        rows.push(MetricRow::bytes("PSS", pss));
    }
    rows.push(MetricRow::count("Threads", &verdict.threads));
    rows.push(MetricRow::count("Open files", &verdict.fds));
    rows.push(MetricRow::count("Connections", &verdict.connections));
    rows.push(MetricRow::count("Page faults", &verdict.page_faults));
    lines.push(table(rows));

    lines.push(format!(
        "Linear fit: RSS slope {}/sample, R² {:.2}",
        format_byte_delta(verdict.rss.slope),
        verdict.rss.r_squared
    ));

    if !verdict.warnings.is_empty() {
        lines.push(String::new());
        lines.push("Resource warnings:".yellow().to_string());
        for w in &verdict.warnings {
            lines.push(format!("  - {}", w.message));
        }
    }

    lines.join("\n")
}

#[derive(Tabled)]
struct CandidateRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "PID")]
    pid: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "RSS Growth")]
    growth: String,
    #[tabled(rename = "Rising")]
    rising: String,
}

fn render_ranking(ranking: &TopRanking, plan: &SamplingPlan) -> String {
    let mut lines = vec![
        "Leak Top Report: Ranked Memory Leak Candidates".bold().to_string(),
        "=".repeat(60),
        format!(
            "Window: {} samples x {:.2}s = {:.2}s",
            plan.count,
            plan.interval.as_secs_f64(),
            plan.count.saturating_sub(1) as f64 * plan.interval.as_secs_f64()
        ),
        String::new(),
    ];

    if ranking.ranked.is_empty() {
        lines.push(warning("No candidate produced enough samples to score"));
    } else {
        let rows: Vec<CandidateRow> = ranking
            .ranked
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                let verdict = entry.report.verdict()?;
                Some(CandidateRow {
                    rank: idx + 1,
                    pid: entry.pid,
                    name: truncate(display_name(&entry.report.identity.name), 20),
                    score: format!("{}/100", entry.score),
                    confidence: color_confidence(verdict.confidence),
                    growth: format_percent(entry.growth_percent),
                    rising: format_ratio(verdict.rss.trend_ratio),
                })
            })
            .collect();
        lines.push(table(rows));

        lines.push(String::new());
        lines.push("Top diagnosis:".bold().to_string());
        for (idx, entry) in ranking.ranked.iter().take(3).enumerate() {
            if let Some(verdict) = entry.report.verdict() {
                lines.push(format!(
                    "{}. PID {} ({}): {}",
                    idx + 1,
                    entry.pid,
                    display_name(&entry.report.identity.name),
                    verdict.diagnosis
                ));
            }
        }
    }

    for report in &ranking.skipped {
        lines.push(warning(&format!(
            "Skipped PID {} ({}): {}",
            report.pid(),
            display_name(&report.identity.name),
            report.stop_reason.as_deref().unwrap_or("insufficient data")
        )));
    }

    lines.join("\n")
}

#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Latest")]
    latest: String,
    #[tabled(rename = "Growth")]
    growth: String,
    #[tabled(rename = "Growth %")]
    growth_percent: String,
    #[tabled(rename = "Rising")]
    rising: String,
}

fn render_allocations(ranked: &[RankedAllocation], group_by: GroupBy, snapshots: usize) -> String {
    let mut lines = vec![
        format!("Allocation growth by {} over {} snapshots", group_by, snapshots)
            .bold()
            .to_string(),
    ];
    if ranked.is_empty() {
        lines.push(warning("No allocation keys found"));
        return lines.join("\n");
    }

    let rows: Vec<AllocationRow> = ranked
        .iter()
        .enumerate()
        .map(|(idx, entry)| AllocationRow {
            rank: idx + 1,
            key: entry.key.clone(),
            score: format!("{}/100", entry.score),
            confidence: color_confidence(entry.confidence),
            latest: format_bytes(entry.latest_bytes),
            growth: format_byte_delta(entry.trend.delta),
            growth_percent: format_percent(entry.trend.growth_percent),
            rising: format_ratio(entry.trend.trend_ratio),
        })
        .collect();
    lines.push(table(rows));
    lines.join("\n")
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "unknown"
    } else {
        name
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert!(matches!(parse_target(Some("top")), Ok(Target::Top)));
        assert!(matches!(parse_target(Some("1234")), Ok(Target::Pid(1234))));
        assert!(matches!(
            parse_target(Some("abc")),
            Err(DiagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            parse_target(None),
            Err(DiagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_render_insufficient_report() {
        colored::control::set_override(false);
        let report = LeakReport {
            identity: memdiag_lib::ProcessIdentity {
                pid: 42,
                name: "worker".to_string(),
                cmdline: "/usr/bin/worker".to_string(),
            },
            requested_samples: 10,
            interval_seconds: 1.0,
            duration_seconds: 0.0,
            partial: true,
            stop_reason: Some("process exited".to_string()),
            samples: Vec::new(),
            outcome: LeakOutcome::InsufficientData {
                samples_collected: 1,
            },
        };
        let text = render_report(&report);
        assert!(text.contains("PID 42 (worker)"));
        assert!(text.contains("Sampling stopped early: process exited"));
        assert!(text.contains("Insufficient data: 1 sample(s)"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(display_name(""), "unknown");
    }
}
