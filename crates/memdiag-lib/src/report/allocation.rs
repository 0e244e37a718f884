//! Allocation-stream ranking
//!
//! Consumes snapshots from an external allocation tracer, one JSON object
//! per line, and ranks allocation sites (or object types) by how much they
//! look like a leak. Each key's cumulative bytes form a series that is
//! scored with the same rules as process RSS.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ranker::{sort_ranked, Ranked};
use super::scoring::{score_trend, Confidence, ScoringConfig};
use crate::anomaly::TrendResult;
use crate::error::{DiagError, Result};

/// One allocation site entry in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Source location (file and line, or module)
    pub location_key: String,
    pub object_type: String,
    pub cumulative_bytes: u64,
}

/// All allocation records captured at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub records: Vec<AllocationRecord>,
}

/// Which record field keys the ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Location,
    ObjectType,
}

impl GroupBy {
    fn key<'a>(&self, record: &'a AllocationRecord) -> &'a str {
        match self {
            GroupBy::Location => &record.location_key,
            GroupBy::ObjectType => &record.object_type,
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Location => f.write_str("location"),
            GroupBy::ObjectType => f.write_str("type"),
        }
    }
}

impl FromStr for GroupBy {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "location" => Ok(GroupBy::Location),
            "type" | "object_type" => Ok(GroupBy::ObjectType),
            other => Err(DiagError::invalid_config(format!(
                "unknown allocation grouping '{}', expected location or type",
                other
            ))),
        }
    }
}

/// Parse a JSON-lines allocation stream; blank lines are ignored
pub fn parse_snapshots(content: &str) -> Result<Vec<AllocationSnapshot>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| DiagError::MalformedInput {
                line: idx + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Ranked allocation key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAllocation {
    pub key: String,
    pub score: u8,
    pub confidence: Confidence,
    pub trend: TrendResult,
    /// Bytes attributed to the key in the last snapshot
    pub latest_bytes: u64,
}

impl Ranked for RankedAllocation {
    type Key = String;

    fn rank_key(&self) -> &String {
        &self.key
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn growth_percent(&self) -> f64 {
        self.trend.growth_percent
    }
}

/// Per-key byte series
///
/// A series starts at the snapshot where its key first appears, so a new
/// allocation site is measured from its first size. A key missing from a
/// later snapshot counts as zero.
pub fn key_series(snapshots: &[AllocationSnapshot], group_by: GroupBy) -> BTreeMap<String, Vec<u64>> {
    let mut series: BTreeMap<String, (usize, Vec<u64>)> = BTreeMap::new();
    for (idx, snapshot) in snapshots.iter().enumerate() {
        for record in &snapshot.records {
            let (first_seen, values) = series
                .entry(group_by.key(record).to_string())
                .or_insert_with(|| (idx, vec![0; snapshots.len() - idx]));
            let slot = &mut values[idx - *first_seen];
            *slot = slot.saturating_add(record.cumulative_bytes);
        }
    }
    series
        .into_iter()
        .map(|(key, (_, values))| (key, values))
        .collect()
}

/// Score every key and return the top `limit` in ranking order
pub fn rank_allocations(
    snapshots: &[AllocationSnapshot],
    group_by: GroupBy,
    limit: usize,
    config: &ScoringConfig,
) -> Result<Vec<RankedAllocation>> {
    if snapshots.len() < 2 {
        return Err(DiagError::InsufficientData {
            collected: snapshots.len(),
        });
    }

    let mut ranked: Vec<RankedAllocation> = key_series(snapshots, group_by)
        .into_iter()
        .map(|(key, values)| {
            let latest_bytes = values.last().copied().unwrap_or(0);
            let floats: Vec<f64> = values.iter().map(|&v| v as f64).collect();
            let trend = TrendResult::fit(&floats);
            let score = score_trend(&trend, config);
            RankedAllocation {
                key,
                score: score.score,
                confidence: score.confidence,
                trend,
                latest_bytes,
            }
        })
        .collect();

    sort_ranked(&mut ranked);
    ranked.truncate(limit);
    Ok(ranked)
}
