//! Indexer configuration loaded from environment variables.
//!
//! All settings come from the environment (or a `.env` file via `dotenvy`).
//! Only `DATABASE_URL` is required; everything else has a default matching
//! the production Sophon deployment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IndexerError, IndexerResult};

/// Environment variable names
const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_CHAIN_RPC_URL: &str = "CHAIN_RPC_URL";
const ENV_CONTRACT_ADDRESS: &str = "CONTRACT_ADDRESS";
const ENV_CRAWL_WINDOW_SIZE: &str = "CRAWL_WINDOW_SIZE";
const ENV_CRAWL_INTERVAL: &str = "CRAWL_INTERVAL_SECS";
const ENV_RPC_TIMEOUT: &str = "RPC_TIMEOUT_SECS";
const ENV_NODE_MONITOR_URL: &str = "NODE_MONITOR_URL";
const ENV_NODE_PAGE_SIZE: &str = "NODE_PAGE_SIZE";
const ENV_NODE_SENTINEL_PAGE: &str = "NODE_SENTINEL_PAGE";
const ENV_NODE_SENTINEL_CHECK: &str = "NODE_SENTINEL_CHECK";
const ENV_NODE_MAX_PAGES: &str = "NODE_MAX_PAGES";
const ENV_NODE_SYNC_INTERVAL: &str = "NODE_SYNC_INTERVAL_SECS";
const ENV_HTTP_TIMEOUT: &str = "HTTP_TIMEOUT_SECS";
const ENV_CACHE_REFRESH_INTERVAL: &str = "CACHE_REFRESH_INTERVAL_SECS";
const ENV_CACHE_TTL: &str = "CACHE_TTL_SECS";
const ENV_MAX_BACKOFF: &str = "MAX_BACKOFF_SECS";

pub const DEFAULT_CHAIN_RPC_URL: &str = "https://rpc.sophon.xyz";
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0xd8E3A935706c08B5e6f8e05D63D3E67ce2ae330C";
pub const DEFAULT_NODE_MONITOR_URL: &str = "https://monitor.sophon.xyz";

pub const DEFAULT_WINDOW_SIZE: u64 = 10_000;
pub const DEFAULT_CRAWL_INTERVAL_SECS: u64 = 900; // 15 minutes
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_NODE_PAGE_SIZE: u32 = 100;
pub const DEFAULT_NODE_SENTINEL_PAGE: u32 = 99_999_999;
pub const DEFAULT_NODE_MAX_PAGES: u32 = 10_000;
pub const DEFAULT_NODE_SYNC_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_REFRESH_INTERVAL_SECS: u64 = 1000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 1100;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 3600;

/// Block-range crawler settings.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub rpc_url: String,
    pub contract_address: String,
    /// Blocks per `eth_getLogs` request.
    pub window_size: u64,
    pub interval: Duration,
    /// Deadline for every single RPC call.
    pub rpc_timeout: Duration,
}

/// Node monitor directory settings.
#[derive(Debug, Clone)]
pub struct NodeSyncConfig {
    pub monitor_url: String,
    pub page_size: u32,
    /// Page number far past any real page, fetched before a full sync.
    pub sentinel_page: u32,
    /// When false the sentinel page is not fetched and every cycle walks the directory.
    pub sentinel_check: bool,
    /// Upper bound on pages walked in one sync.
    pub max_pages: u32,
    pub interval: Duration,
    pub http_timeout: Duration,
}

/// Aggregate snapshot settings. `ttl` is always longer than `refresh_interval`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub refresh_interval: Duration,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub database_url: String,
    pub crawler: CrawlerConfig,
    pub node_sync: NodeSyncConfig,
    pub cache: CacheConfig,
    /// Ceiling for the delay between failed cycles.
    pub max_backoff: Duration,
}

impl IndexerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Config`] when `DATABASE_URL` is missing, when a
    /// numeric variable cannot be parsed, or when the resulting values break
    /// an invariant (see [`IndexerConfig::validate`]).
    pub fn from_env() -> IndexerResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var(ENV_DATABASE_URL)
            .map_err(|_| IndexerError::Config(format!("{} must be set", ENV_DATABASE_URL)))?;

        let config = Self {
            database_url,
            crawler: CrawlerConfig {
                rpc_url: env_or(ENV_CHAIN_RPC_URL, DEFAULT_CHAIN_RPC_URL.to_string())?,
                contract_address: env_or(
                    ENV_CONTRACT_ADDRESS,
                    DEFAULT_CONTRACT_ADDRESS.to_string(),
                )?,
                window_size: env_or(ENV_CRAWL_WINDOW_SIZE, DEFAULT_WINDOW_SIZE)?,
                interval: secs(env_or(ENV_CRAWL_INTERVAL, DEFAULT_CRAWL_INTERVAL_SECS)?),
                rpc_timeout: secs(env_or(ENV_RPC_TIMEOUT, DEFAULT_RPC_TIMEOUT_SECS)?),
            },
            node_sync: NodeSyncConfig {
                monitor_url: env_or(ENV_NODE_MONITOR_URL, DEFAULT_NODE_MONITOR_URL.to_string())?,
                page_size: env_or(ENV_NODE_PAGE_SIZE, DEFAULT_NODE_PAGE_SIZE)?,
                sentinel_page: env_or(ENV_NODE_SENTINEL_PAGE, DEFAULT_NODE_SENTINEL_PAGE)?,
                sentinel_check: env_or(ENV_NODE_SENTINEL_CHECK, true)?,
                max_pages: env_or(ENV_NODE_MAX_PAGES, DEFAULT_NODE_MAX_PAGES)?,
                interval: secs(env_or(ENV_NODE_SYNC_INTERVAL, DEFAULT_NODE_SYNC_INTERVAL_SECS)?),
                http_timeout: secs(env_or(ENV_HTTP_TIMEOUT, DEFAULT_HTTP_TIMEOUT_SECS)?),
            },
            cache: CacheConfig {
                refresh_interval: secs(env_or(
                    ENV_CACHE_REFRESH_INTERVAL,
                    DEFAULT_CACHE_REFRESH_INTERVAL_SECS,
                )?),
                ttl: secs(env_or(ENV_CACHE_TTL, DEFAULT_CACHE_TTL_SECS)?),
            },
            max_backoff: secs(env_or(ENV_MAX_BACKOFF, DEFAULT_MAX_BACKOFF_SECS)?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IndexerResult<()> {
        if self.crawler.window_size == 0 {
            return Err(IndexerError::Config("CRAWL_WINDOW_SIZE must be positive".into()));
        }
        if self.crawler.rpc_timeout.is_zero() || self.node_sync.http_timeout.is_zero() {
            return Err(IndexerError::Config("timeouts must be positive".into()));
        }
        if self.node_sync.page_size == 0 || self.node_sync.max_pages == 0 {
            return Err(IndexerError::Config(
                "NODE_PAGE_SIZE and NODE_MAX_PAGES must be positive".into(),
            ));
        }
        if self.node_sync.sentinel_page <= self.node_sync.max_pages {
            return Err(IndexerError::Config(
                "NODE_SENTINEL_PAGE must lie beyond NODE_MAX_PAGES".into(),
            ));
        }
        if self.cache.ttl <= self.cache.refresh_interval {
            return Err(IndexerError::Config(format!(
                "CACHE_TTL_SECS ({}) must be longer than CACHE_REFRESH_INTERVAL_SECS ({})",
                self.cache.ttl.as_secs(),
                self.cache.refresh_interval.as_secs()
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: secs(DEFAULT_CACHE_REFRESH_INTERVAL_SECS),
            ttl: secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// Read `name`, falling back to `default` when unset. A set but unparseable
/// value is an error rather than a silent fallback.
fn env_or<T>(name: &str, default: T) -> IndexerResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| IndexerError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}
