//! Durable crawl cursor (`system` row with id = 1).
//!
//! Only the block crawler writes the cursor. `advance` is a conditional update,
//! so a stale or buggy caller can never move it backwards.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::entities::{prelude::System, system};
use crate::error::{IndexerError, IndexerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub last_processed_block: u64,
    pub last_run_timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CursorStore {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl CursorStore {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Create the cursor at block 0 unless it already exists.
    pub async fn ensure(&self) -> IndexerResult<Cursor> {
        let row = system::ActiveModel {
            id: Set(system::CURSOR_ID),
            last_run_timestamp: Set(self.clock.now()),
            last_processed_block: Set(0),
        };
        let created = System::insert(row)
            .on_conflict(
                OnConflict::column(system::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        if created > 0 {
            tracing::info!("Initialized crawl cursor at block 0");
        }

        self.read().await
    }

    pub async fn read(&self) -> IndexerResult<Cursor> {
        let row = System::find_by_id(system::CURSOR_ID)
            .one(&self.db)
            .await?
            .ok_or(IndexerError::CursorMissing)?;

        let last_processed_block =
            u64::try_from(row.last_processed_block).map_err(|_| IndexerError::CorruptRow {
                table: "system",
                reason: format!("negative block {}", row.last_processed_block),
            })?;

        Ok(Cursor {
            last_processed_block,
            last_run_timestamp: row.last_run_timestamp,
        })
    }

    /// Move the cursor to `new_block`.
    ///
    /// Equal values are accepted (an empty re-run). A lower value leaves the
    /// row untouched and returns [`IndexerError::CursorRegression`].
    pub async fn advance(&self, new_block: u64, run_time: DateTime<Utc>) -> IndexerResult<Cursor> {
        let target = i64::try_from(new_block).map_err(|_| IndexerError::CorruptRow {
            table: "system",
            reason: format!("block {} exceeds the storable range", new_block),
        })?;

        let result = System::update_many()
            .col_expr(system::Column::LastProcessedBlock, Expr::value(target))
            .col_expr(system::Column::LastRunTimestamp, Expr::value(run_time))
            .filter(system::Column::Id.eq(system::CURSOR_ID))
            .filter(system::Column::LastProcessedBlock.lte(target))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            let current = self.read().await?;
            tracing::error!(
                current_block = current.last_processed_block,
                attempted_block = new_block,
                "Refusing to move crawl cursor backwards"
            );
            return Err(IndexerError::CursorRegression {
                current: current.last_processed_block as i64,
                attempted: target,
            });
        }

        tracing::debug!(block = new_block, "Crawl cursor advanced");
        Ok(Cursor {
            last_processed_block: new_block,
            last_run_timestamp: run_time,
        })
    }
}
