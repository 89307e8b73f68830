#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;

use sophon_node_indexer::clock::{Clock, ManualClock};
use sophon_node_indexer::config::{CacheConfig, CrawlerConfig, IndexerConfig, NodeSyncConfig};
use sophon_node_indexer::error::{IndexerError, IndexerResult};
use sophon_node_indexer::models::event::RawLog;
use sophon_node_indexer::models::node::NodeListing;
use sophon_node_indexer::services::chain_rpc::ChainSource;
use sophon_node_indexer::services::event_decoder::{
    DELEGATE_SIGNATURE, MINT_SIGNATURE, UNDELEGATE_SIGNATURE,
};
use sophon_node_indexer::services::node_monitor::NodeDirectory;

pub const GENESIS_SECS: i64 = 1_730_000_000;

/// Fresh in-memory SQLite database with all migrations applied.
///
/// A single pooled connection keeps every query on the same in-memory db.
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(GENESIS_SECS + secs, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at(0)))
}

pub fn as_clock(clock: &Arc<ManualClock>) -> Arc<dyn Clock> {
    clock.clone()
}

pub fn test_config(window_size: u64) -> IndexerConfig {
    IndexerConfig {
        database_url: "sqlite::memory:".to_string(),
        crawler: CrawlerConfig {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: "0xd8E3A935706c08B5e6f8e05D63D3E67ce2ae330C".to_string(),
            window_size,
            interval: Duration::from_secs(900),
            rpc_timeout: Duration::from_millis(200),
        },
        node_sync: NodeSyncConfig {
            monitor_url: "http://127.0.0.1:9000".to_string(),
            page_size: 2,
            sentinel_page: 99_999_999,
            sentinel_check: true,
            max_pages: 50,
            interval: Duration::from_secs(900),
            http_timeout: Duration::from_millis(200),
        },
        cache: CacheConfig::default(),
        max_backoff: Duration::from_secs(60),
    }
}

/// Address `0x000..0n` in canonical lowercase form.
pub fn address(n: u64) -> String {
    format!("0x{:040x}", n)
}

fn address_topic(n: u64) -> String {
    format!("0x{:064x}", n)
}

fn word(n: u64) -> String {
    format!("0x{:064x}", n)
}

/// Builds raw `eth_getLogs` entries the way the node returns them.
pub struct LogBuilder {
    next_tx: u64,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self { next_tx: 1 }
    }

    fn raw(&mut self, topics: Vec<String>, amount: u64, block: u64, secs: i64) -> RawLog {
        let tx = self.next_tx;
        self.next_tx += 1;
        RawLog {
            address: Some("0xd8E3A935706c08B5e6f8e05D63D3E67ce2ae330C".to_string()),
            topics,
            data: word(amount),
            block_number: Some(format!("0x{:x}", block)),
            block_hash: Some(word(block)),
            block_timestamp: Some(format!("0x{:x}", GENESIS_SECS + secs)),
            transaction_hash: Some(word(0xabc0_0000 + tx)),
            log_index: Some("0x0".to_string()),
        }
    }

    pub fn delegate(&mut self, guardian: u64, operator: u64, amount: u64, block: u64, secs: i64) -> RawLog {
        let topics = vec![
            format!("0x{}", hex::encode(DELEGATE_SIGNATURE)),
            address_topic(guardian),
            address_topic(operator),
        ];
        self.raw(topics, amount, block, secs)
    }

    pub fn undelegate(&mut self, guardian: u64, operator: u64, amount: u64, block: u64, secs: i64) -> RawLog {
        let topics = vec![
            format!("0x{}", hex::encode(UNDELEGATE_SIGNATURE)),
            address_topic(guardian),
            address_topic(operator),
        ];
        self.raw(topics, amount, block, secs)
    }

    pub fn mint(&mut self, guardian: u64, amount: u64, block: u64, secs: i64) -> RawLog {
        let topics = vec![format!("0x{}", hex::encode(MINT_SIGNATURE)), address_topic(guardian)];
        self.raw(topics, amount, block, secs)
    }

    /// A log from some other contract event; the decoder rejects it.
    pub fn unknown(&mut self, block: u64, secs: i64) -> RawLog {
        self.raw(vec![word(0xdead)], 1, block, secs)
    }
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<RawLog>,
    failing_fetches: u32,
    hang_fetches: bool,
    requested: Vec<(u64, u64)>,
}

/// In-process chain with failure injection.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(head: u64, logs: Vec<RawLog>) -> Arc<Self> {
        let chain = Self::default();
        {
            let mut state = chain.state.lock();
            state.head = head;
            state.logs = logs;
        }
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().logs.push(log);
    }

    /// The next `n` `fetch_logs` calls fail with an RPC error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.state.lock().failing_fetches = n;
    }

    /// `fetch_logs` never answers until switched off.
    pub fn hang_fetches(&self, hang: bool) {
        self.state.lock().hang_fetches = hang;
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().requested.clone()
    }
}

fn log_block(log: &RawLog) -> u64 {
    log.block_number
        .as_deref()
        .and_then(|b| u64::from_str_radix(b.trim_start_matches("0x"), 16).ok())
        .unwrap_or_default()
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn head_block(&self) -> IndexerResult<u64> {
        Ok(self.state.lock().head)
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> IndexerResult<Vec<RawLog>> {
        let hang = {
            let mut state = self.state.lock();
            state.requested.push((from_block, to_block));
            if state.failing_fetches > 0 {
                state.failing_fetches -= 1;
                return Err(IndexerError::Rpc("injected eth_getLogs failure".to_string()));
            }
            state.hang_fetches
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let state = self.state.lock();
        Ok(state
            .logs
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log_block(log)))
            .cloned()
            .collect())
    }
}

pub fn listing(operator: u64, status: bool, fee: f64, uptime: f64) -> NodeListing {
    NodeListing {
        operator: address(operator),
        status: Some(status),
        rewards: "12.5".to_string(),
        fee: Some(fee),
        uptime: Some(uptime),
    }
}

#[derive(Default)]
struct DirectoryState {
    nodes: Vec<NodeListing>,
    sentinel: Vec<NodeListing>,
    fail_on_page: Option<u32>,
    fetched_pages: Vec<u32>,
}

/// In-process node monitor. Pages are 1-based slices of `nodes`; the sentinel
/// page answers with whatever was configured through `set_sentinel`.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
    sentinel_page: u32,
}

impl FakeDirectory {
    pub fn new(nodes: Vec<NodeListing>, sentinel_page: u32) -> Arc<Self> {
        let directory = Self {
            sentinel_page,
            ..Default::default()
        };
        {
            let mut state = directory.state.lock();
            state.sentinel = nodes.first().cloned().into_iter().collect();
            state.nodes = nodes;
        }
        Arc::new(directory)
    }

    pub fn set_nodes(&self, nodes: Vec<NodeListing>) {
        self.state.lock().nodes = nodes;
    }

    pub fn set_sentinel(&self, sentinel: Vec<NodeListing>) {
        self.state.lock().sentinel = sentinel;
    }

    pub fn fail_on_page(&self, page: Option<u32>) {
        self.state.lock().fail_on_page = page;
    }

    pub fn fetched_pages(&self) -> Vec<u32> {
        self.state.lock().fetched_pages.clone()
    }
}

#[async_trait]
impl NodeDirectory for FakeDirectory {
    async fn fetch_page(&self, page: u32, per_page: u32) -> IndexerResult<Vec<NodeListing>> {
        let mut state = self.state.lock();
        state.fetched_pages.push(page);

        if state.fail_on_page == Some(page) {
            return Err(IndexerError::Upstream {
                status: 503,
                body: "injected failure".to_string(),
            });
        }
        if page == self.sentinel_page {
            return Ok(state.sentinel.clone());
        }

        let per_page = per_page as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(per_page);
        Ok(state
            .nodes
            .iter()
            .skip(start)
            .take(per_page)
            .cloned()
            .collect())
    }
}
