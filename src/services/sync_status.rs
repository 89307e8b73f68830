//! Sync status ledger
//!
//! One row per background job with the outcome of its latest cycles, so an
//! operator can tell from the database alone whether the crawler or the node
//! sync has been failing.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::clock::Clock;
use crate::entities::sync_status::{self, Entity as SyncStatus};
use crate::error::IndexerResult;

/// Job names for tracking sync status
pub mod jobs {
    pub const BLOCK_CRAWLER: &str = "block_crawler";
    pub const NODE_REGISTRY_SYNC: &str = "node_registry_sync";
    pub const AGGREGATE_CACHE_REFRESH: &str = "aggregate_cache_refresh";
}

#[derive(Clone)]
pub struct SyncStatusLedger {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl SyncStatusLedger {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    async fn find(&self, job_name: &str) -> IndexerResult<Option<sync_status::Model>> {
        Ok(SyncStatus::find()
            .filter(sync_status::Column::JobName.eq(job_name))
            .one(&self.db)
            .await?)
    }

    /// Record a successful cycle
    pub async fn record_success(&self, job_name: &str) -> IndexerResult<()> {
        let now = self.clock.now();

        match self.find(job_name).await? {
            Some(record) => {
                let success_count = record.success_count + 1;
                let mut active_model: sync_status::ActiveModel = record.into();
                active_model.last_success_at = Set(Some(now));
                active_model.last_attempt_at = Set(Some(now));
                active_model.last_error = Set(None);
                active_model.success_count = Set(success_count);
                active_model.update(&self.db).await?;
            }
            None => {
                let new_record = sync_status::ActiveModel {
                    job_name: Set(job_name.to_string()),
                    last_success_at: Set(Some(now)),
                    last_attempt_at: Set(Some(now)),
                    last_error: Set(None),
                    success_count: Set(1),
                    error_count: Set(0),
                    ..Default::default()
                };
                new_record.insert(&self.db).await?;
            }
        }

        tracing::debug!("[{}] Recorded successful cycle", job_name);
        Ok(())
    }

    /// Record a failed cycle. `last_success_at` is left as it was.
    pub async fn record_failure(&self, job_name: &str, error: &str) -> IndexerResult<()> {
        let now = self.clock.now();

        match self.find(job_name).await? {
            Some(record) => {
                let error_count = record.error_count + 1;
                let mut active_model: sync_status::ActiveModel = record.into();
                active_model.last_attempt_at = Set(Some(now));
                active_model.last_error = Set(Some(error.to_string()));
                active_model.error_count = Set(error_count);
                active_model.update(&self.db).await?;
            }
            None => {
                let new_record = sync_status::ActiveModel {
                    job_name: Set(job_name.to_string()),
                    last_success_at: Set(None),
                    last_attempt_at: Set(Some(now)),
                    last_error: Set(Some(error.to_string())),
                    success_count: Set(0),
                    error_count: Set(1),
                    ..Default::default()
                };
                new_record.insert(&self.db).await?;
            }
        }

        tracing::debug!("[{}] Recorded failed cycle: {}", job_name, error);
        Ok(())
    }

    /// Record a cycle that ran but deliberately did nothing (for example a
    /// tripped sentinel). Counters are untouched.
    pub async fn record_attempt(&self, job_name: &str) -> IndexerResult<()> {
        let now = self.clock.now();

        match self.find(job_name).await? {
            Some(record) => {
                let mut active_model: sync_status::ActiveModel = record.into();
                active_model.last_attempt_at = Set(Some(now));
                active_model.update(&self.db).await?;
            }
            None => {
                let new_record = sync_status::ActiveModel {
                    job_name: Set(job_name.to_string()),
                    last_attempt_at: Set(Some(now)),
                    success_count: Set(0),
                    error_count: Set(0),
                    ..Default::default()
                };
                new_record.insert(&self.db).await?;
            }
        }

        Ok(())
    }

    pub async fn job_statuses(&self) -> IndexerResult<Vec<sync_status::Model>> {
        Ok(SyncStatus::find()
            .order_by_asc(sync_status::Column::JobName)
            .all(&self.db)
            .await?)
    }
}
