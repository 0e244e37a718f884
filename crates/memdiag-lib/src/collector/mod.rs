//! Memory sampling from the host
//!
//! This module provides the [`SampleSource`] abstraction over system and
//! per-process memory readings, a `/proc` backed implementation and the
//! `watch` loop that feeds readings into the sliding-window detector.

mod procfs;
mod r#loop;

#[cfg(test)]
mod tests;

pub use self::procfs::ProcfsSource;
pub use r#loop::{WatchConfig, WatchEvent, WatchLoop, WatchLoopBuilder, WatchSummary};

use crate::error::Result;
use crate::models::{ProcessIdentity, ProcessMetrics, ProcessSummary, Subject, SystemMemory};
use std::path::Path;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Trait for memory sampling implementations
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Used system memory and swap in percent of their totals
    async fn read_system_memory(&self) -> Result<SystemMemory>;

    /// Full memory and resource reading for one process
    async fn read_process_metrics(&self, pid: u32) -> Result<ProcessMetrics>;

    /// All processes with a non-zero resident set
    async fn list_processes(&self) -> Result<Vec<ProcessSummary>>;

    /// Name and command line of one process
    async fn process_identity(&self, pid: u32) -> Result<ProcessIdentity>;
}

/// Read the single value the watch loop tracks for `subject`
///
/// Percent for the system, RSS bytes for a process. The full system reading
/// comes along so threshold rules can look at swap.
pub async fn read_subject(
    source: &dyn SampleSource,
    subject: &Subject,
) -> Result<(f64, Option<SystemMemory>)> {
    match subject {
        Subject::System => source
            .read_system_memory()
            .await
            .map(|m| (m.used_percent, Some(m))),
        Subject::Process { pid } => source
            .read_process_metrics(*pid)
            .await
            .map(|m| (m.rss as f64, None)),
    }
}

/// Create the default sample source rooted at `proc_root`
pub fn create_source(proc_root: &Path) -> Arc<dyn SampleSource> {
    tracing::debug!(proc_root = %proc_root.display(), "Using procfs sample source");
    Arc::new(ProcfsSource::with_proc_root(proc_root))
}
