//! Append-only, deduplicating ledger of decoded staking events.
//!
//! The `(transaction_hash, log_index)` unique index is the only thing that
//! makes window refetches safe: a duplicate insert is a successful no-op.
//!
//! Totals, counts and rankings are grouped in SQL. Amounts are read back as
//! base-10 text (`CAST(amount AS TEXT)`) so the full uint256 range survives
//! decoding on every backend.

use alloy::primitives::U256;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::prelude::BigDecimal;
use sea_orm::sea_query::{Alias, Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, Statement,
    TransactionTrait,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use crate::entities::{logs, prelude::Logs};
use crate::error::{IndexerError, IndexerResult};
use crate::models::event::{log_position, DomainEvent, EventKind};
use crate::models::stats::{
    DailyEventCount, DelegationBucket, GuardianTotal, OperatorAggregate,
};

/// Rows per page when replaying the ledger for guardian reconstruction
const LEDGER_PAGE_SIZE: u64 = 1_000;

/// Signed net amount of a group of rows: DELEGATE adds, UNDELEGATE subtracts.
const NET_AMOUNT: &str = "SUM(CASE WHEN event_type = 'DELEGATE' THEN amount \
     WHEN event_type = 'UNDELEGATE' THEN -amount ELSE 0 END)";

const OPERATOR_TOTALS_SQL: &str = r#"
    SELECT "operator",
           event_type,
           CAST(SUM(amount) AS TEXT) AS total_amount,
           COUNT(*) AS event_count,
           MIN("timestamp") AS first_at
    FROM logs
    WHERE "operator" IS NOT NULL
      AND event_type IN ('DELEGATE', 'UNDELEGATE')
    GROUP BY "operator", event_type
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub inserted: usize,
    pub already_present: usize,
}

/// A `logs` row with the amount already rendered as text.
#[derive(Debug, FromQueryResult)]
struct LedgerRow {
    id: i32,
    block_number: i64,
    block_hash: String,
    transaction_hash: String,
    log_index: String,
    event_type: String,
    guardian: String,
    operator: Option<String>,
    amount: String,
    timestamp: DateTime<Utc>,
}

/// Just enough of a DELEGATE/UNDELEGATE row to order it.
#[derive(Debug, FromQueryResult)]
struct PositionRow {
    operator: String,
    guardian: String,
    event_type: String,
    block_number: i64,
    log_index: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, FromQueryResult)]
struct OperatorTotalsRow {
    operator: String,
    event_type: String,
    total_amount: String,
    event_count: i64,
    first_at: DateTime<Utc>,
}

#[derive(Debug, FromQueryResult)]
struct DailyRow {
    event_date: String,
    mint: i64,
    delegations: i64,
    undelegations: i64,
    total: i64,
}

#[derive(Debug, FromQueryResult)]
struct GuardianRow {
    guardian: String,
    net_delegated: String,
}

#[derive(Debug, FromQueryResult)]
struct DelegationRow {
    net_delegated: String,
    operators: i64,
}

#[derive(Clone)]
pub struct EventStore {
    db: DatabaseConnection,
}

impl EventStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn append(&self, event: &DomainEvent) -> IndexerResult<AppendOutcome> {
        append_with(&self.db, event).await
    }

    /// Append one window's events atomically: either all rows are written (or
    /// found already present) or none are.
    pub async fn append_all(&self, events: &[DomainEvent]) -> IndexerResult<AppendSummary> {
        let mut summary = AppendSummary::default();
        if events.is_empty() {
            return Ok(summary);
        }

        let txn = self.db.begin().await?;
        for event in events {
            match append_with(&txn, event).await? {
                AppendOutcome::Inserted => summary.inserted += 1,
                AppendOutcome::AlreadyPresent => summary.already_present += 1,
            }
        }
        txn.commit().await?;

        Ok(summary)
    }

    pub async fn count(&self) -> IndexerResult<u64> {
        Ok(Logs::find().count(&self.db).await?)
    }

    fn statement(&self, sql: impl Into<String>) -> Statement {
        Statement::from_string(self.db.get_database_backend(), sql)
    }

    /// Per-operator totals, counts and first delegation from one grouped
    /// query, plus the current guardians of each operator.
    pub async fn aggregate_by_operator(&self) -> IndexerResult<BTreeMap<String, OperatorAggregate>> {
        let rows = OperatorTotalsRow::find_by_statement(self.statement(OPERATOR_TOTALS_SQL))
            .all(&self.db)
            .await?;

        let mut by_operator: BTreeMap<String, OperatorAggregate> = BTreeMap::new();
        for row in rows {
            let kind = parse_kind(&row.event_type)?;
            let total = parse_amount(&row.total_amount)?;
            let count = u64::try_from(row.event_count).unwrap_or_default();
            let entry = by_operator.entry(row.operator.to_lowercase()).or_default();

            match kind {
                EventKind::Delegate => {
                    entry.total_delegated = entry.total_delegated.saturating_add(total);
                    entry.delegate_count += count;
                    entry.first_delegate_at = Some(match entry.first_delegate_at {
                        Some(first) => first.min(row.first_at),
                        None => row.first_at,
                    });
                }
                EventKind::Undelegate => {
                    entry.total_undelegated = entry.total_undelegated.saturating_add(total);
                    entry.undelegate_count += count;
                }
                EventKind::Mint => {}
            }
        }

        for (operator, guardians) in self.current_guardians().await? {
            if let Some(entry) = by_operator.get_mut(&operator) {
                entry.current_guardians = guardians;
            }
        }

        Ok(by_operator)
    }

    /// Replays DELEGATE/UNDELEGATE positions page by page; memory is bounded
    /// by the number of (operator, guardian) pairs, not by the ledger size.
    async fn current_guardians(&self) -> IndexerResult<BTreeMap<String, BTreeSet<String>>> {
        let mut tracker = GuardianTracker::default();
        let mut pages = Logs::find()
            .select_only()
            .columns([
                logs::Column::Operator,
                logs::Column::Guardian,
                logs::Column::EventType,
                logs::Column::BlockNumber,
                logs::Column::LogIndex,
                logs::Column::Timestamp,
            ])
            .filter(logs::Column::Operator.is_not_null())
            .filter(logs::Column::EventType.is_in([
                EventKind::Delegate.as_str(),
                EventKind::Undelegate.as_str(),
            ]))
            .order_by_asc(logs::Column::Id)
            .into_model::<PositionRow>()
            .paginate(&self.db, LEDGER_PAGE_SIZE);

        while let Some(rows) = pages.fetch_and_next().await? {
            for row in rows {
                let kind = parse_kind(&row.event_type)?;
                let block = u64::try_from(row.block_number).unwrap_or_default();
                tracker.observe(
                    &row.operator,
                    &row.guardian,
                    kind,
                    (row.timestamp, block, log_position(&row.log_index)),
                );
            }
        }

        Ok(tracker.into_current())
    }

    /// Events towards one operator, newest first.
    pub async fn operator_history(&self, operator: &str) -> IndexerResult<Vec<DomainEvent>> {
        let rows = ledger_rows()
            .filter(logs::Column::Operator.eq(operator.trim().to_lowercase()))
            .order_by_desc(logs::Column::Timestamp)
            .order_by_desc(logs::Column::BlockNumber)
            .into_model::<LedgerRow>()
            .all(&self.db)
            .await?;
        let mut events = rows
            .into_iter()
            .map(from_row)
            .collect::<IndexerResult<Vec<_>>>()?;
        events.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));
        Ok(events)
    }

    /// Event counts per UTC day, oldest day first.
    pub async fn daily_event_counts(&self) -> IndexerResult<Vec<DailyEventCount>> {
        let day = match self.db.get_database_backend() {
            DatabaseBackend::Postgres => {
                r#"CAST(CAST(("timestamp" AT TIME ZONE 'UTC') AS DATE) AS TEXT)"#
            }
            _ => r#"DATE("timestamp")"#,
        };
        let sql = format!(
            "SELECT {day} AS event_date, \
                    SUM(CASE WHEN event_type = 'MINT' THEN 1 ELSE 0 END) AS mint, \
                    SUM(CASE WHEN event_type = 'DELEGATE' THEN 1 ELSE 0 END) AS delegations, \
                    SUM(CASE WHEN event_type = 'UNDELEGATE' THEN 1 ELSE 0 END) AS undelegations, \
                    COUNT(*) AS total \
             FROM logs GROUP BY 1 ORDER BY 1",
            day = day
        );

        let rows = DailyRow::find_by_statement(self.statement(sql))
            .all(&self.db)
            .await?;

        rows.into_iter()
            .map(|row| {
                let date = NaiveDate::parse_from_str(&row.event_date, "%Y-%m-%d").map_err(|e| {
                    IndexerError::CorruptRow {
                        table: "logs",
                        reason: format!("event date {:?}: {}", row.event_date, e),
                    }
                })?;
                Ok(DailyEventCount {
                    date,
                    mint: non_negative(row.mint),
                    delegations: non_negative(row.delegations),
                    undelegations: non_negative(row.undelegations),
                    total: non_negative(row.total),
                })
            })
            .collect()
    }

    /// Guardians ranked by net delegated amount, highest first.
    pub async fn top_guardians(&self, limit: usize) -> IndexerResult<Vec<GuardianTotal>> {
        let sql = format!(
            "SELECT guardian, CAST({net} AS TEXT) AS net_delegated \
             FROM logs GROUP BY guardian \
             ORDER BY {net} DESC, guardian ASC \
             LIMIT {limit}",
            net = NET_AMOUNT,
            limit = limit
        );

        let rows = GuardianRow::find_by_statement(self.statement(sql))
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| GuardianTotal {
                guardian: row.guardian,
                net_delegated: row.net_delegated,
            })
            .collect())
    }

    /// Number of operators per net delegated amount, largest amount first.
    pub async fn delegation_distribution(&self) -> IndexerResult<Vec<DelegationBucket>> {
        let sql = format!(
            "SELECT CAST(net AS TEXT) AS net_delegated, COUNT(*) AS operators \
             FROM (SELECT \"operator\", {net} AS net \
                   FROM logs WHERE \"operator\" IS NOT NULL GROUP BY \"operator\") AS per_operator \
             GROUP BY net ORDER BY net DESC",
            net = NET_AMOUNT
        );

        let rows = DelegationRow::find_by_statement(self.statement(sql))
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| DelegationBucket {
                net_delegated: row.net_delegated,
                operators: non_negative(row.operators),
            })
            .collect())
    }
}

/// Every `logs` column, with `amount` cast to text.
fn ledger_rows() -> Select<Logs> {
    Logs::find()
        .select_only()
        .columns([
            logs::Column::Id,
            logs::Column::BlockNumber,
            logs::Column::BlockHash,
            logs::Column::TransactionHash,
            logs::Column::LogIndex,
            logs::Column::EventType,
            logs::Column::Guardian,
            logs::Column::Operator,
            logs::Column::Timestamp,
        ])
        .expr_as(
            Expr::col(logs::Column::Amount).cast_as(Alias::new("text")),
            "amount",
        )
}

async fn append_with<C: ConnectionTrait>(
    conn: &C,
    event: &DomainEvent,
) -> IndexerResult<AppendOutcome> {
    let block_number = i64::try_from(event.block_number).map_err(|_| IndexerError::CorruptRow {
        table: "logs",
        reason: format!("block number {} out of range", event.block_number),
    })?;
    let amount = BigDecimal::from_str(&event.amount.to_string()).map_err(|e| {
        IndexerError::CorruptRow {
            table: "logs",
            reason: format!("amount {}: {}", event.amount, e),
        }
    })?;

    let model = logs::ActiveModel {
        block_number: Set(block_number),
        block_hash: Set(event.block_hash.clone()),
        transaction_hash: Set(event.transaction_hash.clone()),
        log_index: Set(event.log_index.clone()),
        event_type: Set(event.kind.as_str().to_string()),
        guardian: Set(event.guardian.clone()),
        operator: Set(event.operator.clone()),
        amount: Set(amount),
        timestamp: Set(event.timestamp),
        ..Default::default()
    };

    let rows = Logs::insert(model)
        .on_conflict(
            OnConflict::columns([logs::Column::TransactionHash, logs::Column::LogIndex])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    Ok(if rows == 0 {
        AppendOutcome::AlreadyPresent
    } else {
        AppendOutcome::Inserted
    })
}

fn parse_kind(text: &str) -> IndexerResult<EventKind> {
    text.parse::<EventKind>()
        .map_err(|reason| IndexerError::CorruptRow {
            table: "logs",
            reason,
        })
}

fn parse_amount(text: &str) -> IndexerResult<U256> {
    U256::from_str_radix(text.trim(), 10).map_err(|e| IndexerError::CorruptRow {
        table: "logs",
        reason: format!("amount {:?}: {}", text, e),
    })
}

fn non_negative(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

fn from_row(row: LedgerRow) -> IndexerResult<DomainEvent> {
    let corrupt = |reason: String| IndexerError::CorruptRow {
        table: "logs",
        reason: format!("id {}: {}", row.id, reason),
    };

    let kind = row.event_type.parse::<EventKind>().map_err(corrupt)?;
    let amount = U256::from_str_radix(&row.amount, 10)
        .map_err(|e| corrupt(format!("amount {:?}: {}", row.amount, e)))?;
    let block_number =
        u64::try_from(row.block_number).map_err(|e| corrupt(format!("block number: {}", e)))?;

    Ok(DomainEvent {
        kind,
        block_number,
        block_hash: row.block_hash,
        transaction_hash: row.transaction_hash,
        log_index: row.log_index,
        guardian: row.guardian,
        operator: row.operator,
        amount,
        timestamp: row.timestamp,
    })
}

type Position = (DateTime<Utc>, u64, u64);

/// Last-event-wins reconstruction of current guardians.
///
/// A guardian is current for an operator when its latest DELEGATE/UNDELEGATE
/// towards that operator, by (timestamp, block, log position), is a DELEGATE.
/// Observation order does not matter.
#[derive(Debug, Default)]
struct GuardianTracker {
    latest: HashMap<(String, String), (Position, EventKind)>,
}

impl GuardianTracker {
    fn observe(&mut self, operator: &str, guardian: &str, kind: EventKind, position: Position) {
        if kind == EventKind::Mint {
            return;
        }
        self.latest
            .entry((operator.to_lowercase(), guardian.to_lowercase()))
            .and_modify(|current| {
                if position > current.0 {
                    *current = (position, kind);
                }
            })
            .or_insert((position, kind));
    }

    fn into_current(self) -> BTreeMap<String, BTreeSet<String>> {
        let mut current: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for ((operator, guardian), (_, kind)) in self.latest {
            if kind == EventKind::Delegate {
                current.entry(operator).or_default().insert(guardian);
            }
        }
        current
    }
}
