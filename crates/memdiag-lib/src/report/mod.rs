//! Deep leak analysis
//!
//! This module provides:
//! - Leak scoring and confidence bands
//! - The per-process leak report engine
//! - Top-candidate ranking across processes
//! - Ranking of allocation-stream keys with the same rules

mod allocation;
mod engine;
mod ranker;
mod scoring;

pub use allocation::{
    key_series, parse_snapshots, rank_allocations, AllocationRecord, AllocationSnapshot, GroupBy,
    RankedAllocation,
};
pub use engine::{LeakOutcome, LeakReport, LeakReportEngine, LeakVerdict, SamplingPlan};
pub use ranker::{
    rank_order, select_candidates, sort_ranked, Ranked, RankedProcess, TopCandidateRanker, TopRanking,
};
pub use scoring::{
    correlate, diagnosis, score_trend, Confidence, ResourceWarning, Score, ScoringConfig,
};
