//! Operator node registry.
//!
//! Rows are keyed by lowercase operator address. The monitor sync overwrites
//! the externally-owned columns only; `node_text` / `is_ad` are written
//! exclusively by [`NodeRegistry::set_promotion`].

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::entities::{nodes, prelude::Nodes};
use crate::error::IndexerResult;
use crate::models::node::NodeListing;
use crate::models::stats::{FeeBucket, StatusCount, UptimeBucket};

/// Maximum length of a promotion text, in characters
pub const NODE_TEXT_MAX_CHARS: usize = 100;

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").expect("static regex");
}

pub fn normalize_operator(operator: &str) -> String {
    operator.trim().to_lowercase()
}

/// Trim, cap at [`NODE_TEXT_MAX_CHARS`], then drop anything tag-shaped.
pub fn sanitize_node_text(text: &str) -> String {
    let capped: String = text.trim().chars().take(NODE_TEXT_MAX_CHARS).collect();
    HTML_TAG.replace_all(&capped, "").into_owned()
}

#[derive(Debug, FromQueryResult)]
struct StatusRow {
    status: Option<bool>,
    nodes: i64,
}

#[derive(Debug, FromQueryResult)]
struct FeeRow {
    fee: Option<f64>,
    nodes: i64,
}

#[derive(Clone)]
pub struct NodeRegistry {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl NodeRegistry {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Insert or refresh a node from a monitor listing. A single statement,
    /// so the row is never observed half-written.
    pub async fn upsert_listing(&self, listing: &NodeListing) -> IndexerResult<()> {
        let row = nodes::ActiveModel {
            operator: Set(normalize_operator(&listing.operator)),
            status: Set(listing.status),
            rewards: Set(listing.rewards.clone()),
            fee: Set(listing.fee),
            uptime: Set(listing.uptime),
            updated_at: Set(self.clock.now()),
            ..Default::default()
        };

        Nodes::insert(row)
            .on_conflict(
                OnConflict::column(nodes::Column::Operator)
                    .update_columns([
                        nodes::Column::Status,
                        nodes::Column::Rewards,
                        nodes::Column::Fee,
                        nodes::Column::Uptime,
                        nodes::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    pub async fn all(&self) -> IndexerResult<Vec<nodes::Model>> {
        Ok(Nodes::find()
            .order_by_asc(nodes::Column::Operator)
            .all(&self.db)
            .await?)
    }

    pub async fn get(&self, operator: &str) -> IndexerResult<Option<nodes::Model>> {
        Ok(Nodes::find_by_id(normalize_operator(operator))
            .one(&self.db)
            .await?)
    }

    /// Local edit: attach a promotion text and flag the node as advertised.
    ///
    /// Returns `false` when the operator is not in the registry; no row is
    /// created in that case.
    pub async fn set_promotion(&self, operator: &str, text: &str) -> IndexerResult<bool> {
        let operator = normalize_operator(operator);
        let text = sanitize_node_text(text);

        let result = Nodes::update_many()
            .col_expr(nodes::Column::NodeText, Expr::value(text))
            .col_expr(nodes::Column::IsAd, Expr::value(true))
            .col_expr(nodes::Column::UpdatedAt, Expr::value(self.clock.now()))
            .filter(nodes::Column::Operator.eq(operator.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            tracing::warn!(operator = %operator, "Promotion for unknown operator ignored");
            return Ok(false);
        }

        tracing::info!(operator = %operator, "Node promotion text updated");
        Ok(true)
    }

    /// Node count per monitor status; unreported status sorts last.
    pub async fn status_counts(&self) -> IndexerResult<Vec<StatusCount>> {
        let rows = Nodes::find()
            .select_only()
            .column(nodes::Column::Status)
            .column_as(nodes::Column::Operator.count(), "nodes")
            .group_by(nodes::Column::Status)
            .into_model::<StatusRow>()
            .all(&self.db)
            .await?;

        let mut counts: Vec<StatusCount> = rows
            .into_iter()
            .map(|row| StatusCount {
                status: row.status,
                nodes: u64::try_from(row.nodes).unwrap_or_default(),
            })
            .collect();
        counts.sort_by_key(|c| (c.status.is_none(), std::cmp::Reverse(c.status)));
        Ok(counts)
    }

    /// Node count per whole-percent uptime, highest uptime first.
    pub async fn uptime_distribution(&self) -> IndexerResult<Vec<UptimeBucket>> {
        let uptimes: Vec<Option<f64>> = Nodes::find()
            .select_only()
            .column(nodes::Column::Uptime)
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut buckets: BTreeMap<Option<Decimal>, u64> = BTreeMap::new();
        for uptime in uptimes {
            let rounded = uptime.and_then(Decimal::from_f64).map(|u| {
                u.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            });
            *buckets.entry(rounded).or_default() += 1;
        }

        // None sorts first in the map, so reversing puts it last
        Ok(buckets
            .into_iter()
            .rev()
            .map(|(uptime, nodes)| UptimeBucket { uptime, nodes })
            .collect())
    }

    /// Node count per commission, highest fee first.
    pub async fn fee_distribution(&self) -> IndexerResult<Vec<FeeBucket>> {
        let rows = Nodes::find()
            .select_only()
            .column(nodes::Column::Fee)
            .column_as(nodes::Column::Operator.count(), "nodes")
            .group_by(nodes::Column::Fee)
            .into_model::<FeeRow>()
            .all(&self.db)
            .await?;

        let mut buckets: Vec<FeeBucket> = rows
            .into_iter()
            .map(|row| FeeBucket {
                fee: row.fee,
                nodes: u64::try_from(row.nodes).unwrap_or_default(),
            })
            .collect();
        buckets.sort_by(|a, b| b.fee.partial_cmp(&a.fee).unwrap_or(Ordering::Equal));
        Ok(buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_tags() {
        assert_eq!(
            sanitize_node_text("  <b>Fast</b> node <script>x</script> "),
            "Fast node x"
        );
    }

    #[test]
    fn test_sanitize_caps_length_before_stripping() {
        let long = "a".repeat(150);
        assert_eq!(sanitize_node_text(&long).chars().count(), NODE_TEXT_MAX_CHARS);
    }

    #[test]
    fn test_normalize_operator() {
        assert_eq!(normalize_operator(" 0xAbC "), "0xabc");
    }
}
