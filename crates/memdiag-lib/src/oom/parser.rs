//! OOM kill extraction from kernel log text
//!
//! Lines are grouped into incident blocks. A block opens at
//! `<comm> invoked oom-killer:` and closes at `oom_reaper: reaped process`,
//! the next invocation, or the end of input. Within a block the kill line,
//! the `oom-kill:` summary, the task table and the memcg marker are joined
//! by pid. Anything else is ignored.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::cgroup::ContainerIdentity;

const PAGE_SIZE: u64 = 4096;
const BYTES_PER_KIBIBYTE: u64 = 1024;

/// Where log text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogSource {
    #[serde(rename = "kernel-log")]
    KernelLog,
    #[serde(rename = "journal")]
    Journal,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::KernelLog => "kernel-log",
            LogSource::Journal => "journal",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time attached to a log line
///
/// Orders unknown first, then uptime, then wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogTimestamp {
    Unknown,
    /// Seconds since boot, as printed by plain `dmesg`
    Uptime { micros: u64 },
    /// Normalized to UTC whole seconds
    WallClock { at: DateTime<Utc> },
}

impl fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTimestamp::Unknown => f.write_str("-"),
            LogTimestamp::Uptime { micros } => {
                write!(f, "[{}.{:06}]", micros / 1_000_000, micros % 1_000_000)
            }
            LogTimestamp::WallClock { at } => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        }
    }
}

/// One process killed by the OOM killer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OomEvent {
    pub timestamp: LogTimestamp,
    pub killed_process_name: String,
    pub killed_pid: u32,
    /// anon + file + shmem RSS, or the task table RSS when those are absent
    pub memory_at_kill_bytes: Option<u64>,
    pub total_vm_bytes: Option<u64>,
    pub anon_rss_bytes: Option<u64>,
    pub file_rss_bytes: Option<u64>,
    pub shmem_rss_bytes: Option<u64>,
    pub cgroup_path: Option<String>,
    pub container: Option<ContainerIdentity>,
    pub source: LogSource,
    pub raw_line: String,
}

impl OomEvent {
    fn new(pid: u32, name: &str, timestamp: LogTimestamp, source: LogSource) -> Self {
        Self {
            timestamp,
            killed_process_name: name.to_string(),
            killed_pid: pid,
            memory_at_kill_bytes: None,
            total_vm_bytes: None,
            anon_rss_bytes: None,
            file_rss_bytes: None,
            shmem_rss_bytes: None,
            cgroup_path: None,
            container: None,
            source,
            raw_line: String::new(),
        }
    }

    fn dedup_key(&self) -> (LogTimestamp, u32) {
        (self.timestamp, self.killed_pid)
    }

    /// Fill fields this record lacks from a duplicate of the same kill
    fn fill_from(&mut self, other: OomEvent) {
        if self.killed_process_name.is_empty() {
            self.killed_process_name = other.killed_process_name;
        }
        self.memory_at_kill_bytes = self.memory_at_kill_bytes.or(other.memory_at_kill_bytes);
        self.total_vm_bytes = self.total_vm_bytes.or(other.total_vm_bytes);
        self.anon_rss_bytes = self.anon_rss_bytes.or(other.anon_rss_bytes);
        self.file_rss_bytes = self.file_rss_bytes.or(other.file_rss_bytes);
        self.shmem_rss_bytes = self.shmem_rss_bytes.or(other.shmem_rss_bytes);
        if self.cgroup_path.is_none() {
            self.cgroup_path = other.cgroup_path;
            self.container = other.container;
        }
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("Regex to be valid"))
}

fn wall_clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})(?:[.,]\d+)?(Z|[+-]\d{2}:?\d{2})\s*(.*)$",
    )
}

fn journal_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\S+\s+kernel:\s?(.*)$")
}

fn uptime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\[\s*(\d+)\.(\d+)\]\s?(.*)$")
}

fn invoked_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(\S+) invoked oom-killer:")
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        // comm is printed verbatim and may contain spaces
        r"oom-kill:.*task_memcg=([^,\s]+).*?\btask=(.+?)[,\s]+pid=(\d+)",
    )
}

fn task_in_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"Task in (\S+) killed as a result of limit of (\S+)")
}

fn task_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [  pid  ]   uid  tgid total_vm      rss ...
    regex(&RE, r"^\[\s*(\d+)\]\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s")
}

fn killed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Names may contain ')', so the capture runs greedily up to a known trailer
    regex(
        &RE,
        r"Kill(?:ed)? process (\d+) \((.*)\)(?:\s+(?:total-vm|score)\b|,|\s*$)",
    )
}

fn kb_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(total-vm|anon-rss|file-rss|shmem-rss):(\d+)kB")
}

fn reaper_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"oom_reaper: reaped process \d+")
}

/// Split a log line into its timestamp and the kernel message
pub fn split_timestamp(line: &str) -> (LogTimestamp, &str) {
    let line = line.trim();

    if let Some(caps) = wall_clock_re().captures(line) {
        let timestamp = parse_wall_clock(&caps[1], &caps[2])
            .map(|at| LogTimestamp::WallClock { at })
            .unwrap_or(LogTimestamp::Unknown);
        let rest = caps.get(3).map_or("", |m| m.as_str());
        let rest = journal_prefix_re()
            .captures(rest)
            .and_then(|c| c.get(1))
            .map_or(rest, |m| m.as_str());
        // Journal lines may still carry the kernel uptime
        let rest = uptime_re()
            .captures(rest)
            .and_then(|c| c.get(3))
            .map_or(rest, |m| m.as_str());
        return (timestamp, rest);
    }

    if let Some(caps) = uptime_re().captures(line) {
        let secs: u64 = caps[1].parse().unwrap_or(0);
        let mut frac = caps[2].to_string();
        frac.truncate(6);
        let frac_micros = format!("{:0<6}", frac).parse::<u64>().unwrap_or(0);
        let micros = secs.saturating_mul(1_000_000).saturating_add(frac_micros);
        let rest = caps.get(3).map_or("", |m| m.as_str());
        return (LogTimestamp::Uptime { micros }, rest);
    }

    (LogTimestamp::Unknown, line)
}

fn parse_wall_clock(base: &str, offset: &str) -> Option<DateTime<Utc>> {
    let offset = if offset == "Z" {
        "+0000".to_string()
    } else {
        offset.replace(':', "")
    };
    DateTime::parse_from_str(&format!("{}{}", base, offset), "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy)]
struct TaskRow {
    total_vm_pages: u64,
    rss_pages: u64,
}

#[derive(Debug, Clone)]
struct CgroupMarker {
    pid: Option<u32>,
    path: String,
}

/// Lines belonging to one OOM incident
#[derive(Debug, Default)]
struct Incident {
    events: Vec<OomEvent>,
    task_table: HashMap<u32, TaskRow>,
    markers: Vec<CgroupMarker>,
}

impl Incident {
    fn event_mut(&mut self, pid: u32, name: &str, timestamp: LogTimestamp, source: LogSource) -> &mut OomEvent {
        let idx = match self.events.iter().position(|e| e.killed_pid == pid) {
            Some(idx) => idx,
            None => {
                self.events.push(OomEvent::new(pid, name, timestamp, source));
                self.events.len() - 1
            }
        };
        &mut self.events[idx]
    }

    fn finish_into(&mut self, out: &mut Vec<OomEvent>) {
        let incident = std::mem::take(self);
        for mut event in incident.events {
            if event.cgroup_path.is_none() {
                event.cgroup_path = incident
                    .markers
                    .iter()
                    .find(|m| m.pid == Some(event.killed_pid))
                    .or_else(|| incident.markers.iter().find(|m| m.pid.is_none()))
                    .map(|m| m.path.clone());
            }

            let row = incident.task_table.get(&event.killed_pid);
            let rss_parts = [event.anon_rss_bytes, event.file_rss_bytes, event.shmem_rss_bytes];
            event.memory_at_kill_bytes = if rss_parts.iter().any(Option::is_some) {
                Some(rss_parts.iter().flatten().sum())
            } else {
                row.map(|r| r.rss_pages.saturating_mul(PAGE_SIZE))
            };
            if event.total_vm_bytes.is_none() {
                event.total_vm_bytes = row.map(|r| r.total_vm_pages.saturating_mul(PAGE_SIZE));
            }

            event.container = event
                .cgroup_path
                .as_deref()
                .and_then(ContainerIdentity::from_cgroup_path);
            out.push(event);
        }
    }
}

/// Extract OOM kill events from one source's log text
///
/// Deterministic: identical text always yields an identical list.
pub fn parse_log(text: &str, source: LogSource) -> Vec<OomEvent> {
    let mut events = Vec::new();
    let mut incident = Incident::default();

    for raw in text.lines() {
        let (timestamp, message) = split_timestamp(raw);

        if invoked_re().is_match(message) {
            incident.finish_into(&mut events);
            continue;
        }

        if let Some(caps) = summary_re().captures(message) {
            let Ok(pid) = caps[3].parse::<u32>() else {
                continue;
            };
            let memcg = caps[1].to_string();
            incident.markers.push(CgroupMarker {
                pid: Some(pid),
                path: memcg.clone(),
            });
            let event = incident.event_mut(pid, &caps[2], timestamp, source);
            event.cgroup_path = Some(memcg);
            if event.raw_line.is_empty() {
                event.raw_line = raw.trim().to_string();
            }
            continue;
        }

        if let Some(caps) = task_in_re().captures(message) {
            incident.markers.push(CgroupMarker {
                pid: None,
                path: caps[1].to_string(),
            });
            continue;
        }

        if let Some(caps) = task_row_re().captures(message) {
            if let (Ok(pid), Ok(total_vm_pages), Ok(rss_pages)) =
                (caps[1].parse::<u32>(), caps[4].parse::<u64>(), caps[5].parse::<u64>())
            {
                incident.task_table.insert(
                    pid,
                    TaskRow {
                        total_vm_pages,
                        rss_pages,
                    },
                );
            }
            continue;
        }

        if let Some(caps) = killed_re().captures(message) {
            let Ok(pid) = caps[1].parse::<u32>() else {
                continue;
            };
            let event = incident.event_mut(pid, &caps[2], timestamp, source);
            event.timestamp = timestamp;
            event.killed_process_name = caps[2].to_string();
            event.raw_line = raw.trim().to_string();

            for field in kb_field_re().captures_iter(message) {
                let Ok(kb) = field[2].parse::<u64>() else {
                    continue;
                };
                let bytes = Some(kb.saturating_mul(BYTES_PER_KIBIBYTE));
                match &field[1] {
                    "total-vm" => event.total_vm_bytes = bytes,
                    "anon-rss" => event.anon_rss_bytes = bytes,
                    "file-rss" => event.file_rss_bytes = bytes,
                    "shmem-rss" => event.shmem_rss_bytes = bytes,
                    _ => {}
                }
            }
            continue;
        }

        if reaper_re().is_match(message) {
            incident.finish_into(&mut events);
        }
    }

    incident.finish_into(&mut events);
    events
}

/// Merge per-source event lists
///
/// Events with the same timestamp and pid are one kill: the first record is
/// kept and gaps are filled from later duplicates. The result is stably
/// sorted by timestamp.
pub fn merge_events(batches: impl IntoIterator<Item = Vec<OomEvent>>) -> Vec<OomEvent> {
    let mut merged: Vec<OomEvent> = Vec::new();
    let mut seen: HashMap<(LogTimestamp, u32), usize> = HashMap::new();

    for event in batches.into_iter().flatten() {
        match seen.entry(event.dedup_key()) {
            Entry::Occupied(slot) => merged[*slot.get()].fill_from(event),
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(event);
            }
        }
    }

    merged.sort_by_key(|e| e.timestamp);
    merged
}

/// Kill count per process name
pub fn kill_counts(events: &[OomEvent]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.killed_process_name.clone()).or_insert(0) += 1;
    }
    counts
}

/// Most frequently killed name; ties go to the one killed most recently
pub fn most_killed(events: &[OomEvent]) -> Option<String> {
    let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, event) in events.iter().enumerate() {
        if event.killed_process_name.is_empty() {
            continue;
        }
        let entry = stats.entry(event.killed_process_name.as_str()).or_insert((0, idx));
        entry.0 += 1;
        entry.1 = idx;
    }
    stats
        .into_iter()
        .max_by_key(|(_, (count, last_seen))| (*count, *last_seen))
        .map(|(name, _)| name.to_string())
}
