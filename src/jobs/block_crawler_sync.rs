use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::jobs::{spawn_periodic, CycleOutcome, JobContext, PeriodicJob};
use crate::services::block_crawler::{BlockCrawler, CrawlOutcome};
use crate::services::sync_status::jobs;

pub struct BlockCrawlerJob {
    crawler: Arc<BlockCrawler>,
}

impl BlockCrawlerJob {
    pub fn new(crawler: Arc<BlockCrawler>) -> Self {
        Self { crawler }
    }
}

#[async_trait]
impl PeriodicJob for BlockCrawlerJob {
    fn name(&self) -> &'static str {
        jobs::BLOCK_CRAWLER
    }

    async fn run_once(&self) -> CycleOutcome {
        match self.crawler.run_cycle().await {
            Ok(CrawlOutcome::Advanced(report)) => CycleOutcome::Completed(format!(
                "blocks {}..={}: {} windows, {} inserted, {} already present, {} rejected",
                report.start_block,
                report.last_processed_block,
                report.windows_completed,
                report.inserted,
                report.already_present,
                report.rejected
            )),
            Ok(CrawlOutcome::UpToDate { cursor, head }) => {
                CycleOutcome::Completed(format!("up to date at block {} (head {})", cursor, head))
            }
            Ok(CrawlOutcome::AlreadyRunning) => {
                CycleOutcome::Skipped("previous crawl still running".to_string())
            }
            Err(e) => CycleOutcome::Failed(e.to_string()),
        }
    }
}

pub fn start_block_crawler_job(
    crawler: Arc<BlockCrawler>,
    ctx: JobContext,
    interval: Duration,
) -> JoinHandle<()> {
    spawn_periodic(Arc::new(BlockCrawlerJob::new(crawler)), ctx, interval)
}
