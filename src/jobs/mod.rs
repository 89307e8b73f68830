//! Background job scheduling
//!
//! Every unit of background work implements [`PeriodicJob`] and is driven by
//! [`spawn_periodic`]: run once immediately, then again after the configured
//! interval. A failed cycle leaves durable state unchanged and is retried with
//! capped exponential backoff, without limit. Every cycle produces a
//! [`CycleReport`] that is broadcast and recorded in the `sync_status` ledger.

pub mod aggregate_cache_sync;
pub mod block_crawler_sync;
pub mod node_registry_sync;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::services::sync_status::SyncStatusLedger;

/// First retry delay after a failed cycle; doubles per consecutive failure.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

const REPORT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(String),
    /// The cycle ran but deliberately left state alone.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub job: &'static str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
}

#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One cycle. Errors are folded into [`CycleOutcome::Failed`].
    async fn run_once(&self) -> CycleOutcome;
}

/// Shared plumbing handed to every spawned job.
#[derive(Clone)]
pub struct JobContext {
    pub ledger: SyncStatusLedger,
    pub clock: Arc<dyn Clock>,
    pub reports: broadcast::Sender<CycleReport>,
    pub shutdown: watch::Receiver<bool>,
    pub max_backoff: Duration,
}

impl JobContext {
    pub fn new(
        ledger: SyncStatusLedger,
        clock: Arc<dyn Clock>,
        shutdown: watch::Receiver<bool>,
        max_backoff: Duration,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            ledger,
            clock,
            reports,
            shutdown,
            max_backoff,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }
}

/// Delay before the next attempt after `consecutive_failures` failed cycles.
pub fn backoff_delay(base: Duration, consecutive_failures: u32, cap: Duration) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (consecutive_failures - 1).min(31);
    base.saturating_mul(1u32 << exponent).min(cap)
}

/// Run one cycle, publish its report and record it in the ledger.
pub async fn run_and_record(job: &dyn PeriodicJob, ctx: &JobContext) -> CycleReport {
    let started_at = ctx.clock.now();
    let outcome = job.run_once().await;
    let report = CycleReport {
        job: job.name(),
        started_at,
        finished_at: ctx.clock.now(),
        outcome,
    };

    let recorded = match &report.outcome {
        CycleOutcome::Completed(detail) => {
            tracing::info!(job = report.job, %detail, "Cycle completed");
            ctx.ledger.record_success(report.job).await
        }
        CycleOutcome::Skipped(reason) => {
            tracing::warn!(job = report.job, %reason, "Cycle skipped");
            ctx.ledger.record_attempt(report.job).await
        }
        CycleOutcome::Failed(error) => {
            tracing::error!(job = report.job, %error, "Cycle failed");
            ctx.ledger.record_failure(report.job, error).await
        }
    };
    if let Err(e) = recorded {
        tracing::warn!(job = report.job, error = %e, "Failed to record sync status");
    }

    // no subscribers is fine
    let _ = ctx.reports.send(report.clone());
    report
}

/// Spawn `job` on its own task. It runs immediately, then every `interval`
/// until the shutdown channel flips; an in-flight cycle is abandoned on
/// shutdown.
pub fn spawn_periodic(
    job: Arc<dyn PeriodicJob>,
    ctx: JobContext,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown.clone();
        let mut consecutive_failures: u32 = 0;

        tracing::info!(job = job.name(), interval_secs = interval.as_secs(), "Starting job");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = tokio::select! {
                report = run_and_record(job.as_ref(), &ctx) => report,
                _ = shutdown.changed() => {
                    tracing::info!(job = job.name(), "Shutdown during cycle, abandoning it");
                    break;
                }
            };

            let delay = match report.outcome {
                CycleOutcome::Failed(_) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = backoff_delay(RETRY_BASE_DELAY, consecutive_failures, ctx.max_backoff);
                    tracing::info!(
                        job = job.name(),
                        consecutive_failures,
                        retry_in_secs = delay.as_secs(),
                        "Scheduling retry"
                    );
                    delay
                }
                _ => {
                    consecutive_failures = 0;
                    interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(job = job.name(), "Job stopped");
    })
}
