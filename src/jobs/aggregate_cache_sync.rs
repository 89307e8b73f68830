use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::jobs::{spawn_periodic, CycleOutcome, JobContext, PeriodicJob};
use crate::services::aggregate_cache::AggregateCache;
use crate::services::sync_status::jobs;

/// Rebuilds the aggregate snapshot ahead of its expiry so readers rarely
/// pay for a synchronous rebuild.
pub struct AggregateCacheRefreshJob {
    cache: AggregateCache,
}

impl AggregateCacheRefreshJob {
    pub fn new(cache: AggregateCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PeriodicJob for AggregateCacheRefreshJob {
    fn name(&self) -> &'static str {
        jobs::AGGREGATE_CACHE_REFRESH
    }

    async fn run_once(&self) -> CycleOutcome {
        match self.cache.refresh_now().await {
            Ok(snapshot) => CycleOutcome::Completed(format!(
                "{} operators at block {}",
                snapshot.rows.len(),
                snapshot.last_processed_block
            )),
            Err(e) => CycleOutcome::Failed(e.to_string()),
        }
    }
}

pub fn start_aggregate_cache_job(
    cache: AggregateCache,
    ctx: JobContext,
    interval: Duration,
) -> JoinHandle<()> {
    spawn_periodic(Arc::new(AggregateCacheRefreshJob::new(cache)), ctx, interval)
}
