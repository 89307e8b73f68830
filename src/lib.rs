// src/lib.rs

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::IndexerConfig;
use crate::entities::{nodes, sync_status};
use crate::error::IndexerResult;
use crate::models::event::DomainEvent;
use crate::models::stats::{
    CacheSnapshot, DailyEventCount, DelegationBucket, FeeBucket, GuardianTotal, OperatorAggregate,
    Promotion, StatusCount, UptimeBucket,
};
use crate::services::aggregate_cache::AggregateCache;
use crate::services::block_crawler::{BlockCrawler, CrawlerPhase};
use crate::services::chain_rpc::ChainSource;
use crate::services::cursor_store::CursorStore;
use crate::services::event_store::EventStore;
use crate::services::node_registry::NodeRegistry;
use crate::services::sync_status::SyncStatusLedger;

pub mod entities {
    pub mod prelude;
    pub mod logs;
    pub mod nodes;
    pub mod system;
    pub mod sync_status;
}

pub mod services {
    pub mod chain_rpc;
    pub mod event_decoder;
    pub mod event_store;
    pub mod cursor_store;
    pub mod block_crawler;
    pub mod node_monitor;
    pub mod node_registry;
    pub mod node_sync;
    pub mod aggregate_cache;
    pub mod sync_status;
}

pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;

/// Crawl progress as seen by readers.
#[derive(Debug, Clone, Serialize)]
pub struct CursorStatus {
    pub last_processed_block: u64,
    pub last_run_timestamp: DateTime<Utc>,
    pub phase: CrawlerPhase,
}

/// Every handle the read path needs, assembled once at startup.
#[derive(Clone)]
pub struct AppState {
    pub events: EventStore,
    pub cursor: CursorStore,
    pub registry: NodeRegistry,
    pub cache: AggregateCache,
    pub crawler: Arc<BlockCrawler>,
    pub ledger: SyncStatusLedger,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        chain: Arc<dyn ChainSource>,
        clock: Arc<dyn Clock>,
        config: &IndexerConfig,
    ) -> Self {
        let events = EventStore::new(db.clone());
        let cursor = CursorStore::new(db.clone(), clock.clone());
        let registry = NodeRegistry::new(db.clone(), clock.clone());
        let ledger = SyncStatusLedger::new(db.clone(), clock.clone());
        let cache = AggregateCache::new(
            events.clone(),
            registry.clone(),
            cursor.clone(),
            clock.clone(),
            &config.cache,
        );
        let crawler = Arc::new(BlockCrawler::new(
            chain,
            events.clone(),
            cursor.clone(),
            clock,
            &config.crawler,
        ));

        Self {
            events,
            cursor,
            registry,
            cache,
            crawler,
            ledger,
        }
    }

    /// Uncached aggregate over the whole ledger.
    pub async fn aggregate_by_operator(&self) -> IndexerResult<BTreeMap<String, OperatorAggregate>> {
        self.events.aggregate_by_operator().await
    }

    pub async fn current_snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        self.cache.current_snapshot().await
    }

    pub async fn refresh_now(&self) -> IndexerResult<Arc<CacheSnapshot>> {
        self.cache.refresh_now().await
    }

    pub async fn get_or_refresh(&self) -> IndexerResult<Arc<CacheSnapshot>> {
        self.cache.get_or_refresh().await
    }

    pub async fn cursor_status(&self) -> IndexerResult<CursorStatus> {
        let cursor = self.cursor.read().await?;
        Ok(CursorStatus {
            last_processed_block: cursor.last_processed_block,
            last_run_timestamp: cursor.last_run_timestamp,
            phase: self.crawler.phase(),
        })
    }

    pub async fn job_statuses(&self) -> IndexerResult<Vec<sync_status::Model>> {
        self.ledger.job_statuses().await
    }

    pub async fn operator_history(&self, operator: &str) -> IndexerResult<Vec<DomainEvent>> {
        self.events.operator_history(operator).await
    }

    pub async fn daily_event_counts(&self) -> IndexerResult<Vec<DailyEventCount>> {
        self.events.daily_event_counts().await
    }

    pub async fn top_guardians(&self, limit: usize) -> IndexerResult<Vec<GuardianTotal>> {
        self.events.top_guardians(limit).await
    }

    /// Operators grouped by net delegated amount.
    pub async fn delegation_distribution(&self) -> IndexerResult<Vec<DelegationBucket>> {
        self.events.delegation_distribution().await
    }

    pub async fn status_counts(&self) -> IndexerResult<Vec<StatusCount>> {
        self.registry.status_counts().await
    }

    pub async fn uptime_distribution(&self) -> IndexerResult<Vec<UptimeBucket>> {
        self.registry.uptime_distribution().await
    }

    pub async fn fee_distribution(&self) -> IndexerResult<Vec<FeeBucket>> {
        self.registry.fee_distribution().await
    }

    pub async fn promotions(&self) -> IndexerResult<Vec<Promotion>> {
        self.cache.promotions().await
    }

    pub async fn node(&self, operator: &str) -> IndexerResult<Option<nodes::Model>> {
        self.registry.get(operator).await
    }

    /// Local promotion edit; `false` when the operator is unknown.
    pub async fn set_promotion(&self, operator: &str, text: &str) -> IndexerResult<bool> {
        self.registry.set_promotion(operator, text).await
    }
}
