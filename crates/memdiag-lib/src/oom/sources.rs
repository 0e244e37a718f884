//! Kernel log readers
//!
//! Each reader shells out to one system tool with a timeout. A reader that
//! fails reports [`DiagError::LogSourceUnavailable`]; the caller notes it
//! and carries on with the remaining sources.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::parser::LogSource;
use crate::error::{DiagError, Result};

/// Default time allowed for one log command
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of journal entries requested
pub const DEFAULT_JOURNAL_LINES: usize = 5000;

/// Source of raw kernel log text
#[async_trait]
pub trait LogReader: Send + Sync {
    fn source(&self) -> LogSource;

    async fn read(&self) -> Result<String>;
}

/// Reads the kernel ring buffer with `dmesg`
#[derive(Debug, Clone)]
pub struct DmesgReader {
    timeout: Duration,
}

impl DmesgReader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DmesgReader {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TIMEOUT)
    }
}

#[async_trait]
impl LogReader for DmesgReader {
    fn source(&self) -> LogSource {
        LogSource::KernelLog
    }

    async fn read(&self) -> Result<String> {
        match run_command("dmesg", &["--time-format=iso"], self.timeout).await {
            Ok(output) => Ok(output),
            Err(reason) => {
                // Older util-linux lacks --time-format
                debug!(reason = %reason, "dmesg --time-format=iso failed, retrying plain dmesg");
                run_command("dmesg", &[], self.timeout)
                    .await
                    .map_err(|reason| unavailable(LogSource::KernelLog, reason))
            }
        }
    }
}

/// Reads kernel messages from the systemd journal
#[derive(Debug, Clone)]
pub struct JournalReader {
    timeout: Duration,
    lines: usize,
}

impl JournalReader {
    pub fn new(timeout: Duration, lines: usize) -> Self {
        Self { timeout, lines }
    }
}

impl Default for JournalReader {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TIMEOUT, DEFAULT_JOURNAL_LINES)
    }
}

#[async_trait]
impl LogReader for JournalReader {
    fn source(&self) -> LogSource {
        LogSource::Journal
    }

    async fn read(&self) -> Result<String> {
        let lines = self.lines.to_string();
        run_command(
            "journalctl",
            &["-k", "--no-pager", "-o", "short-iso", "-n", lines.as_str()],
            self.timeout,
        )
        .await
        .map_err(|reason| unavailable(LogSource::Journal, reason))
    }
}

/// Fixed text, for replaying captured logs
#[derive(Debug, Clone)]
pub struct StaticReader {
    source: LogSource,
    text: Option<String>,
}

impl StaticReader {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: Some(text.into()),
        }
    }

    /// A reader that always reports itself unavailable
    pub fn unavailable(source: LogSource) -> Self {
        Self { source, text: None }
    }
}

#[async_trait]
impl LogReader for StaticReader {
    fn source(&self) -> LogSource {
        self.source
    }

    async fn read(&self) -> Result<String> {
        self.text
            .clone()
            .ok_or_else(|| unavailable(self.source, "no log text available".to_string()))
    }
}

fn unavailable(source: LogSource, reason: String) -> DiagError {
    DiagError::LogSourceUnavailable {
        source_name: source.to_string(),
        reason,
    }
}

/// Run `program` and return its stdout, or a reason it could not be read
async fn run_command(program: &str, args: &[&str], timeout: Duration) -> std::result::Result<String, String> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => Err(format!("{} timed out after {}s", program, timeout.as_secs())),
        Ok(Err(e)) => Err(match e.kind() {
            io::ErrorKind::NotFound => format!("{} command not found", program),
            io::ErrorKind::PermissionDenied => format!("permission denied running {}", program),
            _ => format!("{} failed: {}", program, e),
        }),
        Ok(Ok(output)) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!("{} exited with {}: {}", program, output.status, stderr.trim()))
        }
        Ok(Ok(output)) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let err = run_command("memdiag-no-such-binary", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.contains("command not found"));
    }

    #[tokio::test]
    async fn test_static_reader() {
        let reader = StaticReader::new(LogSource::Journal, "line");
        assert_eq!(reader.read().await.unwrap(), "line");

        let err = StaticReader::unavailable(LogSource::KernelLog).read().await.unwrap_err();
        assert!(matches!(err, DiagError::LogSourceUnavailable { ref source_name, .. } if source_name == "kernel-log"));
    }
}
