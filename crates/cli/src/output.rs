//! Output formatting utilities

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use memdiag_lib::report::Confidence;
use tabled::{settings::Style, Table, Tabled};

/// Output format for report commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Output format for the watch stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum WatchFormat {
    /// One line per tick (default)
    #[default]
    Table,
    /// One JSON object per event
    Json,
    /// Prometheus text exposition after every tick
    Prometheus,
}

/// Log format for stderr diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where command output goes: stdout, or a file opened in append mode
pub struct Output {
    file: Option<(PathBuf, std::fs::File)>,
}

impl Output {
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open output file {}", path.display()))?;
                // Keep escape codes out of files
                colored::control::set_override(false);
                Some((path.to_path_buf(), file))
            }
            None => None,
        };
        Ok(Self { file })
    }

    /// Write `text` followed by a newline
    pub fn emit(&mut self, text: &str) -> Result<()> {
        match &mut self.file {
            Some((path, file)) => writeln!(file, "{}", text)
                .with_context(|| format!("Failed to write to {}", path.display())),
            None => {
                println!("{}", text);
                Ok(())
            }
        }
    }

    pub fn emit_json<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
        self.emit(&json)
    }
}

/// Render rows as a rounded table
pub fn table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn success(message: &str) -> String {
    format!("{} {}", "✓".green().bold(), message)
}

pub fn warning(message: &str) -> String {
    format!("{} {}", "⚠".yellow().bold(), message)
}

pub fn info(message: &str) -> String {
    format!("{} {}", "ℹ".blue().bold(), message)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Signed byte delta, e.g. `+1.50Mi`
pub fn format_byte_delta(delta: f64) -> String {
    let sign = if delta < 0.0 { "-" } else { "+" };
    format!("{}{}", sign, format_bytes(delta.abs() as u64))
}

pub fn format_percent(value: f64) -> String {
    format!("{:+.2}%", value)
}

/// Format a ratio in [0, 1] as a whole percentage
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

/// Color confidence based on band
pub fn color_confidence(confidence: Confidence) -> String {
    let label = confidence.to_string().to_uppercase();
    match confidence {
        Confidence::High => label.red().bold().to_string(),
        Confidence::Medium => label.yellow().to_string(),
        Confidence::Low => label.blue().to_string(),
        Confidence::None => label.green().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.50Ki");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.00Mi");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00Gi");
    }

    #[test]
    fn test_format_deltas() {
        assert_eq!(format_byte_delta(2048.0), "+2.00Ki");
        assert_eq!(format_byte_delta(-2048.0), "-2.00Ki");
        assert_eq!(format_percent(12.5), "+12.50%");
        assert_eq!(format_percent(-3.0), "-3.00%");
        assert_eq!(format_ratio(0.8), "80%");
    }

    #[test]
    fn test_output_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        Output::open(Some(&path)).unwrap().emit("first").unwrap();
        Output::open(Some(&path)).unwrap().emit("second").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
