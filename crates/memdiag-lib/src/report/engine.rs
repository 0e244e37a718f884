//! Leak report engine
//!
//! Samples one process on a fixed plan and turns the collected series into
//! a [`LeakVerdict`]. Sampling stops early, keeping what was collected, when
//! the process exits, access is revoked or shutdown is requested.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scoring::{correlate, diagnosis, score_trend, Confidence, ResourceWarning, ScoringConfig};
use crate::anomaly::TrendResult;
use crate::collector::SampleSource;
use crate::error::{DiagError, Result};
use crate::models::{metric, series, ProcessIdentity, Sample};
use crate::observability::{DiagMetrics, StructuredLogger};
use crate::shutdown::Shutdown;

/// How many samples to take and how far apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    pub count: usize,
    pub interval: Duration,
}

impl SamplingPlan {
    pub fn new(count: usize, interval: Duration) -> Result<Self> {
        let plan = Self { count, interval };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.count < 2 {
            return Err(DiagError::invalid_config(format!(
                "sample count must be >= 2, got {}",
                self.count
            )));
        }
        if self.interval.is_zero() {
            return Err(DiagError::invalid_config("sample interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Leak assessment of one sampled series set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakVerdict {
    pub score: u8,
    pub confidence: Confidence,
    pub diagnosis: String,
    pub rss: TrendResult,
    pub uss: Option<TrendResult>,
    pub pss: Option<TrendResult>,
    pub threads: TrendResult,
    pub fds: TrendResult,
    pub connections: TrendResult,
    pub page_faults: TrendResult,
    pub warnings: Vec<ResourceWarning>,
}

impl LeakVerdict {
    /// Score a chronological set of process samples
    pub fn from_samples(samples: &[Sample], config: &ScoringConfig) -> Result<Self> {
        if samples.len() < 2 {
            return Err(DiagError::InsufficientData {
                collected: samples.len(),
            });
        }

        let rss = TrendResult::fit(&series(samples, metric::RSS));
        let optional = |name: &str| {
            let values = series(samples, name);
            (values.len() >= 2).then(|| TrendResult::fit(&values))
        };
        let uss = optional(metric::USS);
        let pss = optional(metric::PSS);
        let threads = TrendResult::fit(&series(samples, metric::THREADS));
        let fds = TrendResult::fit(&series(samples, metric::FDS));
        let connections = TrendResult::fit(&series(samples, metric::CONNECTIONS));
        let page_faults = TrendResult::fit(&series(samples, metric::PAGE_FAULTS));

        let score = score_trend(&rss, config);
        let warnings = [
            (metric::THREADS, &threads),
            (metric::FDS, &fds),
            (metric::CONNECTIONS, &connections),
        ]
        .into_iter()
        .filter_map(|(name, trend)| correlate(name, trend, config))
        .collect();

        Ok(Self {
            score: score.score,
            confidence: score.confidence,
            diagnosis: diagnosis(score.confidence, uss.as_ref()),
            rss,
            uss,
            pss,
            threads,
            fds,
            connections,
            page_faults,
            warnings,
        })
    }
}

/// Verdict or the reason there is none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeakOutcome {
    Verdict(LeakVerdict),
    InsufficientData { samples_collected: usize },
}

/// Full result of analysing one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakReport {
    pub identity: ProcessIdentity,
    pub requested_samples: usize,
    pub interval_seconds: f64,
    /// `(samples - 1) * interval`
    pub duration_seconds: f64,
    /// Fewer samples than planned were collected
    pub partial: bool,
    /// Why sampling stopped early
    pub stop_reason: Option<String>,
    pub samples: Vec<Sample>,
    pub outcome: LeakOutcome,
}

impl LeakReport {
    pub fn pid(&self) -> u32 {
        self.identity.pid
    }

    pub fn verdict(&self) -> Option<&LeakVerdict> {
        match &self.outcome {
            LeakOutcome::Verdict(verdict) => Some(verdict),
            LeakOutcome::InsufficientData { .. } => None,
        }
    }
}

/// Samples collected for one process
#[derive(Debug, Clone, Default)]
struct Collection {
    samples: Vec<Sample>,
    stop_reason: Option<String>,
}

/// Runs sampling plans against a sample source
pub struct LeakReportEngine {
    source: Arc<dyn SampleSource>,
    scoring: ScoringConfig,
    logger: StructuredLogger,
    metrics: Option<DiagMetrics>,
}

impl LeakReportEngine {
    pub fn new(source: Arc<dyn SampleSource>, scoring: ScoringConfig, logger: StructuredLogger) -> Self {
        Self {
            source,
            scoring,
            logger,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DiagMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn source(&self) -> &Arc<dyn SampleSource> {
        &self.source
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Sample `pid` according to `plan` and build its report
    ///
    /// Only an invalid plan is an error; everything that goes wrong while
    /// sampling ends up in the report.
    pub async fn analyze(&self, pid: u32, plan: &SamplingPlan, shutdown: Shutdown) -> Result<LeakReport> {
        plan.validate()?;

        let identity = match self.source.process_identity(pid).await {
            Ok(identity) => identity,
            Err(e) => {
                debug!(pid = pid, error = %e, "Process identity unavailable");
                ProcessIdentity {
                    pid,
                    ..ProcessIdentity::default()
                }
            }
        };

        let collection = self.collect(pid, plan, shutdown).await;
        let collected = collection.samples.len();

        let outcome = match LeakVerdict::from_samples(&collection.samples, &self.scoring) {
            Ok(verdict) => {
                let subject = format!("pid {}", pid);
                self.logger.log_leak_verdict(
                    &subject,
                    verdict.score,
                    &verdict.confidence.to_string(),
                    collected,
                    collected < plan.count,
                );
                if let Some(metrics) = &self.metrics {
                    metrics.set_leak_score(&subject, verdict.score);
                }
                LeakOutcome::Verdict(verdict)
            }
            Err(_) => LeakOutcome::InsufficientData {
                samples_collected: collected,
            },
        };

        let interval_seconds = plan.interval.as_secs_f64();
        Ok(LeakReport {
            identity,
            requested_samples: plan.count,
            interval_seconds,
            duration_seconds: collected.saturating_sub(1) as f64 * interval_seconds,
            partial: collected < plan.count,
            stop_reason: collection.stop_reason,
            samples: collection.samples,
            outcome,
        })
    }

    /// Take up to `plan.count` samples, sleeping between them but not after the last
    async fn collect(&self, pid: u32, plan: &SamplingPlan, mut shutdown: Shutdown) -> Collection {
        let mut collection = Collection {
            samples: Vec::with_capacity(plan.count),
            stop_reason: None,
        };

        for i in 0..plan.count {
            if i > 0 {
                let slept = tokio::select! {
                    biased;
                    _ = shutdown.triggered() => false,
                    _ = tokio::time::sleep(plan.interval) => true,
                };
                if !slept {
                    collection.stop_reason = Some("cancelled".to_string());
                    break;
                }
            }

            match self.source.read_process_metrics(pid).await {
                Ok(metrics) => {
                    if shutdown.is_triggered() {
                        collection.stop_reason = Some("cancelled".to_string());
                        break;
                    }
                    collection.samples.push(Sample::from_process(Utc::now(), &metrics));
                }
                Err(e) => {
                    debug!(pid = pid, sample = i, error = %e, "Sampling stopped early");
                    collection.stop_reason = Some(e.to_string());
                    break;
                }
            }
        }

        collection
    }
}
