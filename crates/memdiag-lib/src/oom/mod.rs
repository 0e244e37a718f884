//! OOM kill history
//!
//! Reads the kernel ring buffer and the journal, extracts OOM kill events,
//! resolves the owning container where the cgroup path allows it and
//! summarizes which processes get killed most.

mod cgroup;
mod parser;
mod sources;

pub use cgroup::ContainerIdentity;
pub use parser::{
    kill_counts, merge_events, most_killed, parse_log, split_timestamp, LogSource, LogTimestamp,
    OomEvent,
};
pub use sources::{
    DmesgReader, JournalReader, LogReader, StaticReader, DEFAULT_JOURNAL_LINES,
    DEFAULT_SOURCE_TIMEOUT,
};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DiagError;
use crate::observability::{DiagMetrics, StructuredLogger};

/// A log source that contributed nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNote {
    pub source: LogSource,
    pub reason: String,
}

/// Merged OOM history across all readable sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OomReport {
    pub events: Vec<OomEvent>,
    pub total_events: usize,
    pub most_killed_process: Option<String>,
    pub kill_counts: BTreeMap<String, usize>,
    pub sources_read: Vec<LogSource>,
    pub unavailable_sources: Vec<SourceNote>,
}

impl OomReport {
    /// Summarize already merged events
    pub fn from_events(
        events: Vec<OomEvent>,
        sources_read: Vec<LogSource>,
        unavailable_sources: Vec<SourceNote>,
    ) -> Self {
        Self {
            total_events: events.len(),
            most_killed_process: most_killed(&events),
            kill_counts: kill_counts(&events),
            events,
            sources_read,
            unavailable_sources,
        }
    }
}

/// Runs every configured reader and merges what they return
pub struct OomCollector {
    readers: Vec<Box<dyn LogReader>>,
    logger: StructuredLogger,
    metrics: Option<DiagMetrics>,
}

impl OomCollector {
    pub fn new(readers: Vec<Box<dyn LogReader>>, logger: StructuredLogger) -> Self {
        Self {
            readers,
            logger,
            metrics: None,
        }
    }

    /// `dmesg` and `journalctl` with default timeouts
    pub fn system(logger: StructuredLogger) -> Self {
        Self::new(
            vec![
                Box::new(DmesgReader::default()),
                Box::new(JournalReader::default()),
            ],
            logger,
        )
    }

    pub fn with_metrics(mut self, metrics: DiagMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Read all sources; an unavailable source is noted, never fatal
    pub async fn collect(&self) -> OomReport {
        let mut batches = Vec::with_capacity(self.readers.len());
        let mut sources_read = Vec::new();
        let mut unavailable = Vec::new();

        for reader in &self.readers {
            let source = reader.source();
            match reader.read().await {
                Ok(text) => {
                    let events = parse_log(&text, source);
                    if let Some(metrics) = &self.metrics {
                        metrics.add_oom_events(source.as_str(), events.len());
                    }
                    sources_read.push(source);
                    batches.push(events);
                }
                Err(e) => {
                    let reason = match e {
                        DiagError::LogSourceUnavailable { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    self.logger.log_oom_source_unavailable(source.as_str(), &reason);
                    unavailable.push(SourceNote { source, reason });
                }
            }
        }

        let report = OomReport::from_events(merge_events(batches), sources_read, unavailable);
        self.logger
            .log_oom_summary(report.total_events, report.most_killed_process.as_deref());
        report
    }
}
