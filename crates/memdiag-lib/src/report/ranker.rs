//! Top-candidate ranking
//!
//! Picks the heaviest processes, analyses each one on its own task and
//! orders the results by score, then growth, then subject key.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use super::engine::{LeakReport, LeakReportEngine, SamplingPlan};
use crate::error::{DiagError, Result};
use crate::models::ProcessSummary;
use crate::shutdown::Shutdown;

/// Something that can be placed in a leak ranking
pub trait Ranked {
    type Key: Ord;

    fn rank_key(&self) -> &Self::Key;
    fn score(&self) -> u8;
    fn growth_percent(&self) -> f64;
}

/// Score descending, growth descending, key ascending
pub fn rank_order<T: Ranked>(a: &T, b: &T) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| b.growth_percent().total_cmp(&a.growth_percent()))
        .then_with(|| a.rank_key().cmp(b.rank_key()))
}

pub fn sort_ranked<T: Ranked>(items: &mut [T]) {
    items.sort_by(rank_order);
}

/// The `k` processes with the highest RSS, ties broken by ascending pid
pub fn select_candidates(mut processes: Vec<ProcessSummary>, k: usize) -> Vec<ProcessSummary> {
    processes.sort_by(|a, b| b.rss.cmp(&a.rss).then_with(|| a.pid.cmp(&b.pid)));
    processes.truncate(k);
    processes
}

/// A process report that produced a verdict
#[derive(Debug, Clone, Serialize)]
pub struct RankedProcess {
    pub pid: u32,
    pub score: u8,
    pub growth_percent: f64,
    pub report: LeakReport,
}

impl RankedProcess {
    /// Hands the report back when it carries no verdict
    pub fn from_report(report: LeakReport) -> std::result::Result<Self, LeakReport> {
        let Some((score, growth_percent)) = report.verdict().map(|v| (v.score, v.rss.growth_percent)) else {
            return Err(report);
        };
        Ok(Self {
            pid: report.pid(),
            score,
            growth_percent,
            report,
        })
    }
}

impl Ranked for RankedProcess {
    type Key = u32;

    fn rank_key(&self) -> &u32 {
        &self.pid
    }

    fn score(&self) -> u8 {
        self.score
    }

    fn growth_percent(&self) -> f64 {
        self.growth_percent
    }
}

/// Outcome of a top-candidate run
#[derive(Debug, Clone, Serialize)]
pub struct TopRanking {
    pub requested_limit: usize,
    pub candidates: Vec<ProcessSummary>,
    pub ranked: Vec<RankedProcess>,
    /// Candidates that ended with fewer than two samples
    pub skipped: Vec<LeakReport>,
}

/// Ranks the heaviest processes by leak likelihood
pub struct TopCandidateRanker {
    engine: Arc<LeakReportEngine>,
}

impl TopCandidateRanker {
    pub fn new(engine: Arc<LeakReportEngine>) -> Self {
        Self { engine }
    }

    /// Analyse the top `limit` processes by RSS concurrently
    pub async fn rank(&self, limit: usize, plan: &SamplingPlan, shutdown: Shutdown) -> Result<TopRanking> {
        if limit == 0 {
            return Err(DiagError::invalid_config("candidate limit must be >= 1"));
        }
        plan.validate()?;

        let processes = self.engine.source().list_processes().await?;
        let candidates = select_candidates(processes, limit);

        let mut tasks = JoinSet::new();
        for candidate in &candidates {
            let engine = Arc::clone(&self.engine);
            let shutdown = shutdown.clone();
            let plan = *plan;
            let pid = candidate.pid;
            tasks.spawn(async move { engine.analyze(pid, &plan, shutdown).await });
        }

        let mut ranked = Vec::new();
        let mut skipped = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let report = match joined {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Candidate analysis task failed");
                    continue;
                }
            };
            match RankedProcess::from_report(report) {
                Ok(entry) => ranked.push(entry),
                Err(report) => skipped.push(report),
            }
        }

        sort_ranked(&mut ranked);
        skipped.sort_by_key(|r| r.pid());

        Ok(TopRanking {
            requested_limit: limit,
            candidates,
            ranked,
            skipped,
        })
    }
}
