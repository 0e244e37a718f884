//! /proc based sample source
//!
//! Reads system and per-process memory state from the proc filesystem:
//! - meminfo for the system memory and swap percentages
//! - <pid>/status for RSS, thread count and name
//! - <pid>/stat for page fault counters
//! - <pid>/smaps_rollup for PSS and USS (optional, needs access)
//! - <pid>/fd for descriptor and socket counts

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use procfs::process::{FDTarget, Process};
use procfs::{FromRead, Meminfo, ProcError};
use tokio::fs;

use super::SampleSource;
use crate::error::{DiagError, Result};
use crate::models::{ProcessIdentity, ProcessMetrics, ProcessSummary, SystemMemory};

const BYTES_PER_KIBIBYTE: u64 = 1024;

/// Sample source backed by a proc filesystem mount
#[derive(Debug, Clone)]
pub struct ProcfsSource {
    proc_root: PathBuf,
}

impl ProcfsSource {
    /// Create a source reading from `/proc`
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Create a source with a custom proc root (for testing)
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    fn process(&self, pid: u32) -> Result<Process> {
        Process::new_with_root(self.proc_root.join(pid.to_string())).map_err(|e| unavailable(pid, e))
    }

    /// Used memory and swap as percentages of their totals
    ///
    /// Falls back to free + buffers + cached on kernels without MemAvailable.
    /// Swap is `None` when no swap is configured.
    pub fn system_memory(meminfo: &Meminfo) -> Option<SystemMemory> {
        if meminfo.mem_total == 0 {
            return None;
        }
        let available = meminfo.mem_available.unwrap_or_else(|| {
            meminfo
                .mem_free
                .saturating_add(meminfo.buffers)
                .saturating_add(meminfo.cached)
        });
        let used = meminfo.mem_total.saturating_sub(available);

        let swap_percent = (meminfo.swap_total > 0).then(|| {
            let swap_used = meminfo.swap_total.saturating_sub(meminfo.swap_free);
            swap_used as f64 / meminfo.swap_total as f64 * 100.0
        });

        Some(SystemMemory {
            used_percent: used as f64 / meminfo.mem_total as f64 * 100.0,
            swap_percent,
        })
    }

    /// Parse `smaps_rollup`, returning `(pss, uss)` in bytes
    pub fn parse_smaps_rollup(content: &str) -> (Option<u64>, Option<u64>) {
        let mut pss = None;
        let mut uss: Option<u64> = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(kb) = value.parse::<u64>() else {
                continue;
            };
            let bytes = kb.saturating_mul(BYTES_PER_KIBIBYTE);
            match name {
                "Pss:" => pss = Some(bytes),
                "Private_Clean:" | "Private_Dirty:" | "Private_Hugetlb:" => {
                    uss = Some(uss.unwrap_or(0).saturating_add(bytes));
                }
                _ => {}
            }
        }

        (pss, uss)
    }

    /// Count open descriptors and the subset that are sockets
    fn count_fds(pid: u32, process: &Process) -> Result<(u64, u64)> {
        let mut fds = 0u64;
        let mut sockets = 0u64;
        // Descriptors can close between listing and readlink
        for fd in process.fd().map_err(|e| unavailable(pid, e))?.flatten() {
            fds += 1;
            if matches!(fd.target, FDTarget::Socket(_)) {
                sockets += 1;
            }
        }
        Ok((fds, sockets))
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSource for ProcfsSource {
    async fn read_system_memory(&self) -> Result<SystemMemory> {
        let path = self.proc_root.join("meminfo");
        let meminfo = Meminfo::from_file(&path).map_err(|e| {
            DiagError::sample_unavailable("system", format!("{}: {}", path.display(), e))
        })?;
        Self::system_memory(&meminfo)
            .ok_or_else(|| DiagError::sample_unavailable("system", "meminfo reports zero MemTotal"))
    }

    async fn read_process_metrics(&self, pid: u32) -> Result<ProcessMetrics> {
        let process = self.process(pid)?;

        let status = process.status().map_err(|e| unavailable(pid, e))?;
        let rss = status
            .vmrss
            .map(|kb| kb.saturating_mul(BYTES_PER_KIBIBYTE))
            .ok_or_else(|| {
                DiagError::sample_unavailable(
                    format!("pid {}", pid),
                    "no resident memory (kernel thread or zombie)",
                )
            })?;

        let stat = process.stat().map_err(|e| unavailable(pid, e))?;
        let (fds, connections) = Self::count_fds(pid, &process)?;

        let smaps_rollup = self.proc_root.join(pid.to_string()).join("smaps_rollup");
        let (pss, uss) = match fs::read_to_string(&smaps_rollup).await {
            Ok(content) => Self::parse_smaps_rollup(&content),
            Err(_) => (None, None),
        };

        Ok(ProcessMetrics {
            rss,
            uss,
            pss,
            threads: status.threads,
            fds,
            connections,
            minor_faults: stat.minflt,
            major_faults: stat.majflt,
        })
    }

    async fn list_processes(&self) -> Result<Vec<ProcessSummary>> {
        let processes = procfs::process::all_processes_with_root(&self.proc_root).map_err(|e| {
            DiagError::sample_unavailable("process list", format!("{}: {}", self.proc_root.display(), e))
        })?;

        let mut summaries = Vec::new();
        // Processes may exit mid-scan
        for process in processes.flatten() {
            let Ok(pid) = u32::try_from(process.pid()) else {
                continue;
            };
            let Ok(status) = process.status() else {
                continue;
            };
            let rss = status.vmrss.unwrap_or(0).saturating_mul(BYTES_PER_KIBIBYTE);
            if rss > 0 {
                summaries.push(ProcessSummary {
                    pid,
                    name: status.name,
                    rss,
                });
            }
        }

        Ok(summaries)
    }

    async fn process_identity(&self, pid: u32) -> Result<ProcessIdentity> {
        let process = self.process(pid)?;
        let name = process.stat().map_err(|e| unavailable(pid, e))?.comm;
        let cmdline = process
            .cmdline()
            .map(|args| args.join(" "))
            .unwrap_or_default();

        Ok(ProcessIdentity { pid, name, cmdline })
    }
}

fn unavailable(pid: u32, err: ProcError) -> DiagError {
    let reason = match err {
        ProcError::NotFound(_) => "process exited".to_string(),
        ProcError::PermissionDenied(Some(path)) => {
            format!("permission denied reading {}", path.display())
        }
        ProcError::PermissionDenied(None) => "permission denied".to_string(),
        other => other.to_string(),
    };
    DiagError::sample_unavailable(format!("pid {}", pid), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MeminfoFixture;

    fn meminfo(content: &str) -> Meminfo {
        Meminfo::from_read(content.as_bytes()).unwrap()
    }

    #[test]
    fn test_system_memory_percentages() {
        let content = MeminfoFixture {
            total_kb: 16_000_000,
            available_kb: Some(4_000_000),
            swap_total_kb: 2_000_000,
            swap_free_kb: 500_000,
            ..MeminfoFixture::default()
        }
        .render();
        let memory = ProcfsSource::system_memory(&meminfo(&content)).unwrap();
        assert!((memory.used_percent - 75.0).abs() < 1e-9);
        assert!((memory.swap_percent.unwrap() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_system_memory_without_available() {
        let content = MeminfoFixture {
            total_kb: 1000,
            free_kb: 100,
            available_kb: None,
            buffers_kb: 100,
            cached_kb: 300,
            ..MeminfoFixture::default()
        }
        .render();
        let memory = ProcfsSource::system_memory(&meminfo(&content)).unwrap();
        assert!((memory.used_percent - 50.0).abs() < 1e-9);
        assert_eq!(memory.swap_percent, None);
    }

    #[test]
    fn test_parse_smaps_rollup() {
        let content = "00400000-7fff03d61000 ---p 00000000 00:00 0  [rollup]\n\
Rss:               10240 kB\n\
Pss:                8192 kB\n\
Shared_Clean:       2048 kB\n\
Private_Clean:      1024 kB\n\
Private_Dirty:      6144 kB\n";
        let (pss, uss) = ProcfsSource::parse_smaps_rollup(content);
        assert_eq!(pss, Some(8192 * 1024));
        assert_eq!(uss, Some(7168 * 1024));
    }

    #[test]
    fn test_unavailable_reasons() {
        let exited = unavailable(9, ProcError::NotFound(Some(PathBuf::from("/proc/9"))));
        assert!(matches!(
            exited,
            DiagError::SampleUnavailable { ref reason, .. } if reason == "process exited"
        ));

        let denied = unavailable(9, ProcError::PermissionDenied(Some(PathBuf::from("/proc/9/fd"))));
        assert!(denied.is_transient());
        assert!(denied.to_string().contains("permission denied reading /proc/9/fd"));
    }
}
