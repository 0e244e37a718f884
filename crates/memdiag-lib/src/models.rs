//! Core data models shared across the sampling and analysis paths

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric names used as series keys
pub mod metric {
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const RSS: &str = "rss";
    pub const USS: &str = "uss";
    pub const PSS: &str = "pss";
    pub const THREADS: &str = "threads";
    pub const FDS: &str = "fds";
    pub const CONNECTIONS: &str = "connections";
    pub const PAGE_FAULTS: &str = "page_faults";
}

/// Point-in-time reading of one or more metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, metric: &str, value: f64) -> Self {
        self.values.insert(metric.to_string(), value);
        self
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    /// Build a sample from a full process reading
    pub fn from_process(timestamp: DateTime<Utc>, m: &ProcessMetrics) -> Self {
        let mut sample = Sample::new(timestamp)
            .with(metric::RSS, m.rss as f64)
            .with(metric::THREADS, m.threads as f64)
            .with(metric::FDS, m.fds as f64)
            .with(metric::CONNECTIONS, m.connections as f64)
            .with(metric::PAGE_FAULTS, m.page_faults() as f64);
        if let Some(uss) = m.uss {
            sample = sample.with(metric::USS, uss as f64);
        }
        if let Some(pss) = m.pss {
            sample = sample.with(metric::PSS, pss as f64);
        }
        sample
    }
}

/// Extract the chronological series for one metric, skipping samples that lack it
pub fn series(samples: &[Sample], metric: &str) -> Vec<f64> {
    samples.iter().filter_map(|s| s.get(metric)).collect()
}

/// System-wide memory usage read from meminfo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemMemory {
    pub used_percent: f64,
    /// `None` when the node has no swap configured
    pub swap_percent: Option<f64>,
}

/// Full per-process reading from the sample source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub rss: u64,
    /// Unique set size; needs read access to smaps_rollup
    pub uss: Option<u64>,
    pub pss: Option<u64>,
    pub threads: u64,
    pub fds: u64,
    /// Open socket descriptors
    pub connections: u64,
    pub minor_faults: u64,
    pub major_faults: u64,
}

impl ProcessMetrics {
    pub fn page_faults(&self) -> u64 {
        self.minor_faults.saturating_add(self.major_faults)
    }
}

/// Lightweight process listing entry used for candidate selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub pid: u32,
    pub name: String,
    pub rss: u64,
}

/// Descriptive identity of a process for reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub name: String,
    pub cmdline: String,
}

/// Something the watch loop monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    System,
    Process { pid: u32 },
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::System => write!(f, "system"),
            Subject::Process { pid } => write!(f, "pid {}", pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_from_process_skips_missing_uss() {
        let m = ProcessMetrics {
            rss: 100,
            uss: None,
            pss: Some(80),
            threads: 4,
            fds: 10,
            connections: 2,
            minor_faults: 7,
            major_faults: 3,
        };
        let sample = Sample::from_process(Utc::now(), &m);
        assert_eq!(sample.get(metric::RSS), Some(100.0));
        assert_eq!(sample.get(metric::USS), None);
        assert_eq!(sample.get(metric::PSS), Some(80.0));
        assert_eq!(sample.get(metric::PAGE_FAULTS), Some(10.0));
    }

    #[test]
    fn test_series_extraction() {
        let now = Utc::now();
        let samples = vec![
            Sample::new(now).with(metric::RSS, 1.0),
            Sample::new(now).with(metric::THREADS, 3.0),
            Sample::new(now).with(metric::RSS, 2.0),
        ];
        assert_eq!(series(&samples, metric::RSS), vec![1.0, 2.0]);
    }

    #[test]
    fn test_subject_display() {
        assert_eq!(Subject::System.to_string(), "system");
        assert_eq!(Subject::Process { pid: 42 }.to_string(), "pid 42");
    }
}
