//! `memdiag oom`: reconstruct OOM kills from kernel logs

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use memdiag_lib::oom::{OomCollector, OomEvent, OomReport};
use memdiag_lib::StructuredLogger;
use tabled::Tabled;

use crate::config::Settings;
use crate::output::{format_bytes, info, success, table, warning, Output, OutputFormat};

#[derive(Debug, Args)]
pub struct OomArgs {
    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Append output to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub async fn run(settings: &Settings, args: OomArgs) -> Result<()> {
    let collector = OomCollector::system(StructuredLogger::new(settings.node_name.clone()));
    let report = collector.collect().await;

    let mut output = Output::open(args.output.as_deref())?;
    match args.format {
        OutputFormat::Json => output.emit_json(&report)?,
        OutputFormat::Table => output.emit(&render_report(&report))?,
    }
    Ok(())
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "PID")]
    pid: u32,
    #[tabled(rename = "Process")]
    process: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Cgroup")]
    cgroup: String,
    #[tabled(rename = "Source")]
    source: String,
}

impl From<&OomEvent> for EventRow {
    fn from(event: &OomEvent) -> Self {
        let container = event
            .container
            .as_ref()
            .map(|c| {
                let id = c
                    .container_id
                    .as_deref()
                    .map(|id| id.chars().take(12).collect::<String>());
                match (id, c.pod_uid.as_deref()) {
                    (Some(id), Some(pod)) => format!("{} (pod {})", id, pod),
                    (Some(id), None) => id,
                    (None, Some(pod)) => format!("pod {}", pod),
                    (None, None) => "-".to_string(),
                }
            })
            .unwrap_or_else(|| "-".to_string());

        Self {
            time: event.timestamp.to_string(),
            pid: event.killed_pid,
            process: event.killed_process_name.clone(),
            memory: event
                .memory_at_kill_bytes
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string()),
            container,
            cgroup: event.cgroup_path.clone().unwrap_or_else(|| "-".to_string()),
            source: event.source.to_string(),
        }
    }
}

fn render_report(report: &OomReport) -> String {
    let mut lines = vec!["OOM Kill History".bold().to_string(), "=".repeat(60)];

    for note in &report.unavailable_sources {
        lines.push(warning(&format!("{} unavailable: {}", note.source, note.reason)));
    }

    if report.events.is_empty() {
        lines.push(success("No OOM kills found"));
        return lines.join("\n");
    }

    lines.push(table(report.events.iter().map(EventRow::from).collect()));
    lines.push(info(&format!("Total OOM kills: {}", report.total_events)));
    if let Some(name) = &report.most_killed_process {
        let count = report.kill_counts.get(name).copied().unwrap_or(0);
        lines.push(info(&format!("Most killed: {} ({} time(s))", name.cyan(), count)));
    }

    lines.join("\n")
}
