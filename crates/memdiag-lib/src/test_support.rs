//! Scripted sample source shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collector::SampleSource;
use crate::error::{DiagError, Result};
use crate::models::{ProcessIdentity, ProcessMetrics, ProcessSummary, SystemMemory};

struct ScriptedProcess {
    name: String,
    listed_rss: u64,
    readings: Mutex<VecDeque<ProcessMetrics>>,
}

/// Replays canned readings; a process "exits" once its readings run out
#[derive(Default)]
pub(crate) struct ScriptedSource {
    system: Mutex<VecDeque<Option<SystemMemory>>>,
    processes: HashMap<u32, ScriptedProcess>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory percentages without swap; `None` entries read as unavailable
    pub fn with_system(self, values: impl IntoIterator<Item = Option<f64>>) -> Self {
        self.with_system_memory(values.into_iter().map(|value| {
            value.map(|used_percent| SystemMemory {
                used_percent,
                swap_percent: None,
            })
        }))
    }

    pub fn with_system_memory(self, readings: impl IntoIterator<Item = Option<SystemMemory>>) -> Self {
        *self.system.lock().unwrap() = readings.into_iter().collect();
        self
    }

    pub fn with_process(mut self, pid: u32, name: &str, readings: Vec<ProcessMetrics>) -> Self {
        let listed_rss = readings.first().map(|m| m.rss).unwrap_or(0);
        self.processes.insert(
            pid,
            ScriptedProcess {
                name: name.to_string(),
                listed_rss,
                readings: Mutex::new(readings.into()),
            },
        );
        self
    }
}

/// Readings with only RSS set; other resources stay flat
pub(crate) fn rss_readings(values: &[u64]) -> Vec<ProcessMetrics> {
    values
        .iter()
        .map(|&rss| ProcessMetrics {
            rss,
            threads: 8,
            fds: 32,
            connections: 2,
            ..ProcessMetrics::default()
        })
        .collect()
}

#[async_trait]
impl SampleSource for ScriptedSource {
    async fn read_system_memory(&self) -> Result<SystemMemory> {
        match self.system.lock().unwrap().pop_front() {
            Some(Some(memory)) => Ok(memory),
            Some(None) => Err(DiagError::sample_unavailable("system", "scripted gap")),
            None => Err(DiagError::sample_unavailable("system", "script exhausted")),
        }
    }

    async fn read_process_metrics(&self, pid: u32) -> Result<ProcessMetrics> {
        self.processes
            .get(&pid)
            .and_then(|p| p.readings.lock().unwrap().pop_front())
            .ok_or_else(|| DiagError::sample_unavailable(format!("pid {}", pid), "process exited"))
    }

    async fn list_processes(&self) -> Result<Vec<ProcessSummary>> {
        Ok(self
            .processes
            .iter()
            .map(|(pid, p)| ProcessSummary {
                pid: *pid,
                name: p.name.clone(),
                rss: p.listed_rss,
            })
            .collect())
    }

    async fn process_identity(&self, pid: u32) -> Result<ProcessIdentity> {
        let process = self
            .processes
            .get(&pid)
            .ok_or_else(|| DiagError::sample_unavailable(format!("pid {}", pid), "process exited"))?;
        Ok(ProcessIdentity {
            pid,
            name: process.name.clone(),
            cmdline: format!("/usr/bin/{}", process.name),
        })
    }
}

/// A complete `/proc/meminfo` with the fields memdiag reads made adjustable
pub(crate) struct MeminfoFixture {
    pub total_kb: u64,
    pub free_kb: u64,
    /// Omitted from the file when `None`, as on old kernels
    pub available_kb: Option<u64>,
    pub buffers_kb: u64,
    pub cached_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

impl Default for MeminfoFixture {
    fn default() -> Self {
        Self {
            total_kb: 8_000_000,
            free_kb: 1_000_000,
            available_kb: Some(2_000_000),
            buffers_kb: 100_000,
            cached_kb: 900_000,
            swap_total_kb: 0,
            swap_free_kb: 0,
        }
    }
}

impl MeminfoFixture {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("MemTotal:       {} kB", self.total_kb),
            format!("MemFree:        {} kB", self.free_kb),
        ];
        if let Some(available) = self.available_kb {
            lines.push(format!("MemAvailable:   {} kB", available));
        }
        lines.push(format!("Buffers:        {} kB", self.buffers_kb));
        lines.push(format!("Cached:         {} kB", self.cached_kb));
        lines.extend(
            [
                "SwapCached:            0 kB",
                "Active:           400000 kB",
                "Inactive:         300000 kB",
                "Active(anon):     200000 kB",
                "Inactive(anon):    50000 kB",
                "Active(file):     200000 kB",
                "Inactive(file):   250000 kB",
                "Unevictable:           0 kB",
                "Mlocked:               0 kB",
            ]
            .map(String::from),
        );
        lines.push(format!("SwapTotal:      {} kB", self.swap_total_kb));
        lines.push(format!("SwapFree:       {} kB", self.swap_free_kb));
        lines.extend(
            [
                "Zswap:                 0 kB",
                "Zswapped:              0 kB",
                "Dirty:               120 kB",
                "Writeback:             0 kB",
                "AnonPages:        240000 kB",
                "Mapped:           110000 kB",
                "Shmem:             12000 kB",
                "KReclaimable:      60000 kB",
                "Slab:             120000 kB",
                "SReclaimable:      60000 kB",
                "SUnreclaim:        60000 kB",
                "KernelStack:        9000 kB",
                "PageTables:         6000 kB",
                "SecPageTables:         0 kB",
                "NFS_Unstable:          0 kB",
                "Bounce:                0 kB",
                "WritebackTmp:          0 kB",
                "CommitLimit:     4000000 kB",
                "Committed_AS:    3000000 kB",
                "VmallocTotal:   34359738367 kB",
                "VmallocUsed:       40000 kB",
                "VmallocChunk:          0 kB",
                "Percpu:             4000 kB",
                "HardwareCorrupted:     0 kB",
                "AnonHugePages:         0 kB",
                "ShmemHugePages:        0 kB",
                "ShmemPmdMapped:        0 kB",
                "FileHugePages:         0 kB",
                "FilePmdMapped:         0 kB",
                "CmaTotal:              0 kB",
                "CmaFree:               0 kB",
                "HugePages_Total:       0",
                "HugePages_Free:        0",
                "HugePages_Rsvd:        0",
                "HugePages_Surp:        0",
                "Hugepagesize:       2048 kB",
                "Hugetlb:               0 kB",
                "DirectMap4k:      200000 kB",
                "DirectMap2M:     8000000 kB",
                "DirectMap1G:           0 kB",
            ]
            .map(String::from),
        );
        lines.join("\n") + "\n"
    }
}
