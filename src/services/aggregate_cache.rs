//! Aggregate snapshot cache
//!
//! Joins every registry node with its ledger aggregate and keeps the result as
//! a single time-bounded [`CacheSnapshot`]. The background refresher calls
//! [`AggregateCache::refresh_now`]; readers use
//! [`AggregateCache::get_or_refresh`], which rebuilds synchronously when the
//! snapshot is missing or expired.

use alloy::primitives::I256;
use chrono::Duration as ChronoDuration;
use moka::future::Cache;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::entities::nodes;
use crate::error::{IndexerError, IndexerResult};
use crate::models::stats::{CacheSnapshot, OperatorAggregate, OperatorStats, Promotion};
use crate::services::cursor_store::CursorStore;
use crate::services::event_store::EventStore;
use crate::services::node_registry::NodeRegistry;

const SNAPSHOT_KEY: &str = "table_data";

/// Delegations a single node accepts
pub const NODE_CAPACITY: u64 = 20;

#[derive(Clone)]
pub struct AggregateCache {
    events: EventStore,
    registry: NodeRegistry,
    cursor: CursorStore,
    clock: Arc<dyn Clock>,
    cache: Cache<&'static str, Arc<CacheSnapshot>>,
    ttl: Duration,
}

impl AggregateCache {
    pub fn new(
        events: EventStore,
        registry: NodeRegistry,
        cursor: CursorStore,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(config.ttl)
            .build();

        Self {
            events,
            registry,
            cursor,
            clock,
            cache,
            ttl: config.ttl,
        }
    }

    /// Recompute the snapshot from storage without touching the cache.
    pub async fn build_snapshot(&self) -> IndexerResult<CacheSnapshot> {
        let last_processed_block = self.cursor.read().await?.last_processed_block;
        let nodes = self.registry.all().await?;
        let aggregates = self.events.aggregate_by_operator().await?;

        let generated_at = self.clock.now();
        let ttl = ChronoDuration::from_std(self.ttl)
            .map_err(|e| IndexerError::Config(format!("cache ttl out of range: {}", e)))?;

        Ok(CacheSnapshot {
            generated_at,
            expires_at: generated_at + ttl,
            last_processed_block,
            rows: compose_rows(&nodes, &aggregates),
        })
    }

    /// Rebuild and publish a fresh snapshot.
    pub async fn refresh_now(&self) -> IndexerResult<Arc<CacheSnapshot>> {
        let snapshot = Arc::new(self.build_snapshot().await?);
        self.cache.insert(SNAPSHOT_KEY, snapshot.clone()).await;

        tracing::info!(
            rows = snapshot.rows.len(),
            block = snapshot.last_processed_block,
            expires_at = %snapshot.expires_at,
            "Aggregate snapshot refreshed"
        );
        Ok(snapshot)
    }

    /// The published snapshot, if one exists and has not expired.
    pub async fn current_snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        let snapshot = self.cache.get(SNAPSHOT_KEY).await?;
        if snapshot.is_live_at(self.clock.now()) {
            Some(snapshot)
        } else {
            None
        }
    }

    /// Read path: the live snapshot, or a synchronous rebuild on miss.
    /// Concurrent misses share one rebuild.
    pub async fn get_or_refresh(&self) -> IndexerResult<Arc<CacheSnapshot>> {
        if let Some(snapshot) = self.current_snapshot().await {
            tracing::debug!("Aggregate snapshot cache hit");
            return Ok(snapshot);
        }

        tracing::info!("Aggregate snapshot missing or expired, rebuilding");
        self.cache.invalidate(SNAPSHOT_KEY).await;
        self.cache
            .try_get_with(SNAPSHOT_KEY, async {
                self.build_snapshot().await.map(Arc::new)
            })
            .await
            .map_err(IndexerError::SnapshotRebuild)
    }

    /// Advertised, online nodes below [`NODE_CAPACITY`], most recently
    /// updated first.
    pub async fn promotions(&self) -> IndexerResult<Vec<Promotion>> {
        let nodes = self.registry.all().await?;
        let aggregates = self.events.aggregate_by_operator().await?;
        Ok(compose_promotions(&nodes, &aggregates))
    }
}

/// Uptime with one decimal, halves rounded away from zero.
fn round_uptime(uptime: Option<f64>) -> Option<Decimal> {
    uptime
        .and_then(Decimal::from_f64)
        .map(|u| u.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
}

/// Join nodes with aggregates. Rows follow the node order (operator
/// ascending); nodes without events get zero aggregates.
pub fn compose_rows(
    nodes: &[nodes::Model],
    aggregates: &BTreeMap<String, OperatorAggregate>,
) -> Vec<OperatorStats> {
    let empty = OperatorAggregate::default();
    let mut rows: Vec<OperatorStats> = nodes
        .iter()
        .map(|node| {
            let aggregate = aggregates
                .get(&node.operator.to_lowercase())
                .unwrap_or(&empty);
            OperatorStats {
                operator: node.operator.clone(),
                status: node.status,
                rewards: node.rewards.clone(),
                fee: node.fee,
                uptime: round_uptime(node.uptime),
                created_at: aggregate.first_delegate_at,
                actual_delegations: aggregate.net_delegated().to_string(),
                total_delegate_amount: aggregate.total_delegated.to_string(),
                total_undelegate_amount: aggregate.total_undelegated.to_string(),
                total_delegate_operations: aggregate.delegate_count,
                total_undelegate_operations: aggregate.undelegate_count,
                current_delegators: aggregate.current_guardians.iter().cloned().collect(),
                last_node_update: node.updated_at,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.operator.cmp(&b.operator));
    rows
}

/// Advertised online nodes below capacity. Only operators that appear in the
/// ledger are eligible.
pub fn compose_promotions(
    nodes: &[nodes::Model],
    aggregates: &BTreeMap<String, OperatorAggregate>,
) -> Vec<Promotion> {
    let capacity = I256::try_from(NODE_CAPACITY).unwrap_or(I256::ZERO);

    let mut promotions: Vec<Promotion> = nodes
        .iter()
        .filter(|node| node.is_ad && node.status == Some(true))
        .filter_map(|node| {
            let aggregate = aggregates.get(&node.operator.to_lowercase())?;
            let actual = aggregate.net_delegated();
            if actual >= capacity {
                return None;
            }
            Some(Promotion {
                operator: node.operator.clone(),
                node_text: node.node_text.clone(),
                fee: node.fee,
                uptime: round_uptime(node.uptime),
                actual_delegations: actual.to_string(),
                remaining_capacity: capacity.saturating_sub(actual).to_string(),
                created_at: aggregate.first_delegate_at,
                last_updated: node.updated_at,
            })
        })
        .collect();

    promotions.sort_by(|a, b| {
        b.last_updated
            .cmp(&a.last_updated)
            .then_with(|| a.operator.cmp(&b.operator))
    });
    promotions
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_730_000_000 + secs, 0).unwrap()
    }

    fn node(operator: &str, status: bool, is_ad: bool, updated: i64) -> nodes::Model {
        nodes::Model {
            operator: operator.to_string(),
            status: Some(status),
            rewards: "1.5".to_string(),
            fee: Some(5.0),
            uptime: Some(99.95),
            node_text: is_ad.then(|| "fast node".to_string()),
            is_ad,
            updated_at: at(updated),
        }
    }

    fn delegated(amount: u64) -> OperatorAggregate {
        OperatorAggregate {
            total_delegated: U256::from(amount),
            delegate_count: 1,
            first_delegate_at: Some(at(1)),
            current_guardians: ["0xg1".to_string()].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_round_uptime_half_away_from_zero() {
        assert_eq!(round_uptime(Some(99.95)), Some(dec!(100.0)));
        assert_eq!(round_uptime(Some(87.25)), Some(dec!(87.3)));
        assert_eq!(round_uptime(Some(f64::NAN)), None);
        assert_eq!(round_uptime(None), None);
    }

    #[test]
    fn test_rows_join_nodes_with_aggregates() {
        let nodes = vec![node("0xbb", true, false, 5), node("0xaa", false, false, 3)];
        let aggregates: BTreeMap<_, _> = [("0xbb".to_string(), delegated(7))].into_iter().collect();

        let rows = compose_rows(&nodes, &aggregates);
        assert_eq!(rows.len(), 2);

        // sorted by operator, node without events gets zero aggregates
        assert_eq!(rows[0].operator, "0xaa");
        assert_eq!(rows[0].actual_delegations, "0");
        assert!(rows[0].current_delegators.is_empty());
        assert_eq!(rows[0].created_at, None);

        assert_eq!(rows[1].actual_delegations, "7");
        assert_eq!(rows[1].total_delegate_operations, 1);
        assert_eq!(rows[1].current_delegators, vec!["0xg1".to_string()]);
        assert_eq!(rows[1].last_node_update, at(5));
    }

    #[test]
    fn test_operators_without_node_rows_are_not_listed() {
        let aggregates: BTreeMap<_, _> = [("0xcc".to_string(), delegated(1))].into_iter().collect();
        assert!(compose_rows(&[], &aggregates).is_empty());
    }

    #[test]
    fn test_promotions_filter_and_order() {
        let nodes = vec![
            node("0x01", true, true, 10),  // 5 delegated, eligible
            node("0x02", true, true, 20),  // full
            node("0x03", false, true, 30), // offline
            node("0x04", true, false, 40), // not advertised
            node("0x05", true, true, 50),  // no events, not in the ledger
        ];
        let aggregates: BTreeMap<_, _> = [
            ("0x01".to_string(), delegated(5)),
            ("0x02".to_string(), delegated(20)),
        ]
        .into_iter()
        .collect();

        let promotions = compose_promotions(&nodes, &aggregates);
        let operators: Vec<_> = promotions.iter().map(|p| p.operator.as_str()).collect();
        assert_eq!(operators, vec!["0x01"]);
        assert_eq!(promotions[0].remaining_capacity, "15");
        assert_eq!(promotions[0].uptime, Some(dec!(100.0)));
    }
}
