use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::jobs::{spawn_periodic, CycleOutcome, JobContext, PeriodicJob};
use crate::services::node_sync::{NodeRegistrySynchronizer, NodeSyncOutcome};
use crate::services::sync_status::jobs;

pub struct NodeRegistrySyncJob {
    synchronizer: NodeRegistrySynchronizer,
}

impl NodeRegistrySyncJob {
    pub fn new(synchronizer: NodeRegistrySynchronizer) -> Self {
        Self { synchronizer }
    }
}

#[async_trait]
impl PeriodicJob for NodeRegistrySyncJob {
    fn name(&self) -> &'static str {
        jobs::NODE_REGISTRY_SYNC
    }

    async fn run_once(&self) -> CycleOutcome {
        match self.synchronizer.run_once().await {
            Ok(NodeSyncOutcome::Completed {
                pages,
                upserted,
                truncated,
            }) => CycleOutcome::Completed(format!(
                "{} nodes upserted from {} pages{}",
                upserted,
                pages,
                if truncated { " (page limit reached)" } else { "" }
            )),
            Ok(NodeSyncOutcome::Skipped { reason }) => CycleOutcome::Skipped(reason),
            Err(e) => CycleOutcome::Failed(e.to_string()),
        }
    }
}

pub fn start_node_registry_sync_job(
    synchronizer: NodeRegistrySynchronizer,
    ctx: JobContext,
    interval: Duration,
) -> JoinHandle<()> {
    spawn_periodic(
        Arc::new(NodeRegistrySyncJob::new(synchronizer)),
        ctx,
        interval,
    )
}
