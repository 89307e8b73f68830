//! Resumable block-range crawler
//!
//! One cycle reads the cursor, asks the chain for its head and walks the gap
//! in fixed-size windows, strictly in order:
//!
//! ```text
//! IDLE -> FETCH_HEAD -> FETCH_RANGE -> DECODE -> PERSIST -> ADVANCE_CURSOR
//!                           ^                                    |
//!                           +------------- next window ----------+
//! ```
//!
//! The cursor moves to a window's end block only after every event of that
//! window is committed. A fetch or persist failure ends the cycle with the
//! cursor untouched, so the same window is fetched again next time; the event
//! store's dedup key makes the replay harmless.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::CrawlerConfig;
use crate::error::{with_deadline, IndexerResult};
use crate::services::chain_rpc::ChainSource;
use crate::services::cursor_store::CursorStore;
use crate::services::event_decoder;
use crate::services::event_store::EventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlerPhase {
    Idle,
    FetchHead,
    FetchRange,
    Decode,
    Persist,
    AdvanceCursor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub start_block: u64,
    pub head_block: u64,
    pub windows_completed: u32,
    pub logs_fetched: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub rejected: usize,
    pub last_processed_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CrawlOutcome {
    /// Cursor already at (or past) the chain head.
    UpToDate { cursor: u64, head: u64 },
    Advanced(CrawlReport),
    /// Another cycle holds the crawler; nothing was done.
    AlreadyRunning,
}

/// Split `(cursor, head]` into consecutive inclusive windows of `size` blocks.
pub fn block_windows(cursor: u64, head: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut windows = Vec::new();
    let mut start = cursor.saturating_add(1);
    while start <= head {
        let end = start.saturating_add(size - 1).min(head);
        windows.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    windows
}

pub struct BlockCrawler {
    chain: Arc<dyn ChainSource>,
    events: EventStore,
    cursor: CursorStore,
    clock: Arc<dyn Clock>,
    window_size: u64,
    rpc_timeout: Duration,
    phase: RwLock<CrawlerPhase>,
    run_lock: Mutex<()>,
}

impl BlockCrawler {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        events: EventStore,
        cursor: CursorStore,
        clock: Arc<dyn Clock>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            chain,
            events,
            cursor,
            clock,
            window_size: config.window_size,
            rpc_timeout: config.rpc_timeout,
            phase: RwLock::new(CrawlerPhase::Idle),
            run_lock: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> CrawlerPhase {
        *self.phase.read()
    }

    fn enter(&self, phase: CrawlerPhase) {
        *self.phase.write() = phase;
    }

    /// Crawl from the cursor to the current head.
    pub async fn run_cycle(&self) -> IndexerResult<CrawlOutcome> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::debug!("Crawler cycle already in progress, skipping");
            return Ok(CrawlOutcome::AlreadyRunning);
        };

        let result = self.crawl().await;
        self.enter(CrawlerPhase::Idle);
        result
    }

    async fn crawl(&self) -> IndexerResult<CrawlOutcome> {
        let cursor = self.cursor.read().await?.last_processed_block;

        self.enter(CrawlerPhase::FetchHead);
        let head = with_deadline("eth_blockNumber", self.rpc_timeout, self.chain.head_block()).await?;

        if cursor >= head {
            tracing::debug!(cursor, head, "Crawler is up to date");
            return Ok(CrawlOutcome::UpToDate { cursor, head });
        }

        let windows = block_windows(cursor, head, self.window_size);
        tracing::info!(
            from_block = cursor + 1,
            to_block = head,
            windows = windows.len(),
            "Starting block crawl"
        );

        let mut report = CrawlReport {
            start_block: cursor + 1,
            head_block: head,
            last_processed_block: cursor,
            ..Default::default()
        };

        for (from_block, to_block) in windows {
            if let Err(e) = self.process_window(from_block, to_block, &mut report).await {
                tracing::warn!(
                    from_block,
                    to_block,
                    windows_completed = report.windows_completed,
                    cursor = report.last_processed_block,
                    error = %e,
                    "Window failed, cursor left unchanged; it will be retried next cycle"
                );
                return Err(e);
            }
        }

        tracing::info!(
            windows = report.windows_completed,
            inserted = report.inserted,
            already_present = report.already_present,
            rejected = report.rejected,
            cursor = report.last_processed_block,
            "Block crawl complete"
        );

        Ok(CrawlOutcome::Advanced(report))
    }

    async fn process_window(
        &self,
        from_block: u64,
        to_block: u64,
        report: &mut CrawlReport,
    ) -> IndexerResult<()> {
        self.enter(CrawlerPhase::FetchRange);
        let raw_logs = with_deadline(
            "eth_getLogs",
            self.rpc_timeout,
            self.chain.fetch_logs(from_block, to_block),
        )
        .await?;

        self.enter(CrawlerPhase::Decode);
        let mut decoded = Vec::with_capacity(raw_logs.len());
        let mut rejected = 0;
        for raw in &raw_logs {
            match event_decoder::decode(raw) {
                Ok(event) => decoded.push(event),
                Err(reason) => {
                    rejected += 1;
                    tracing::debug!(
                        tx_hash = ?raw.transaction_hash,
                        log_index = ?raw.log_index,
                        reason = %reason,
                        "Skipping log"
                    );
                }
            }
        }

        self.enter(CrawlerPhase::Persist);
        let summary = self.events.append_all(&decoded).await?;

        self.enter(CrawlerPhase::AdvanceCursor);
        self.cursor.advance(to_block, self.clock.now()).await?;

        report.windows_completed += 1;
        report.logs_fetched += raw_logs.len();
        report.inserted += summary.inserted;
        report.already_present += summary.already_present;
        report.rejected += rejected;
        report.last_processed_block = to_block;

        tracing::info!(
            from_block,
            to_block,
            logs = raw_logs.len(),
            inserted = summary.inserted,
            already_present = summary.already_present,
            rejected,
            "Processed block window"
        );

        Ok(())
    }
}
