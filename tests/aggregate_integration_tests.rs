mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use sophon_node_indexer::clock::{Clock, ManualClock};
use sophon_node_indexer::jobs::block_crawler_sync::BlockCrawlerJob;
use sophon_node_indexer::models::event::RawLog;
use sophon_node_indexer::jobs::{run_and_record, spawn_periodic, CycleOutcome, JobContext};
use sophon_node_indexer::services::node_sync::NodeRegistrySynchronizer;
use sophon_node_indexer::services::sync_status::jobs;
use sophon_node_indexer::AppState;

use crate::common::{
    address, as_clock, at, listing, manual_clock, setup_test_db, test_config, FakeChain,
    FakeDirectory, LogBuilder,
};

/// Operator 1 ends with guardian 7 (D, U, D) and without guardian 8 (D, U);
/// operator 2 has a single delegation from guardian 8.
fn delegation_history() -> Vec<RawLog> {
    let mut logs = LogBuilder::new();
    vec![
        logs.mint(7, 1_000, 1, 5),
        logs.delegate(7, 1, 10, 2, 10),
        logs.delegate(8, 1, 4, 3, 11),
        logs.undelegate(7, 1, 3, 4, 12),
        logs.undelegate(8, 1, 4, 5, 13),
        logs.delegate(7, 1, 5, 6, 86_400 + 14),
        logs.delegate(8, 2, 20, 7, 86_400 + 15),
    ]
}

async fn populated_state() -> (AppState, Arc<ManualClock>) {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let clock = manual_clock();
    let config = test_config(3);
    let chain = FakeChain::new(8, delegation_history());
    let state = AppState::new(db, chain, as_clock(&clock), &config);
    state.cursor.ensure().await.unwrap();
    state.crawler.run_cycle().await.unwrap();

    let directory = FakeDirectory::new(
        vec![
            listing(1, true, 5.0, 99.95),
            listing(2, true, 3.0, 87.25),
            listing(3, false, 1.0, 10.0),
        ],
        config.node_sync.sentinel_page,
    );
    NodeRegistrySynchronizer::new(state.registry.clone(), directory, config.node_sync.clone())
        .run_once()
        .await
        .unwrap();

    (state, clock)
}

#[tokio::test]
async fn test_current_delegators_follow_latest_event() {
    let (state, _clock) = populated_state().await;
    let aggregates = state.aggregate_by_operator().await.unwrap();

    let first = &aggregates[&address(1)];
    assert_eq!(first.total_delegated, U256::from(19));
    assert_eq!(first.total_undelegated, U256::from(7));
    assert_eq!(first.delegate_count, 3);
    assert_eq!(first.undelegate_count, 2);
    assert_eq!(first.net_delegated().to_string(), "12");
    assert_eq!(first.first_delegate_at, Some(at(10)));
    assert_eq!(
        first.current_guardians.iter().cloned().collect::<Vec<_>>(),
        vec![address(7)]
    );

    let second = &aggregates[&address(2)];
    assert!(second.current_guardians.contains(&address(8)));
    assert!(!aggregates.contains_key(&address(3)));
}

#[tokio::test]
async fn test_snapshot_rows_cover_every_node() {
    let (state, _clock) = populated_state().await;
    let snapshot = state.refresh_now().await.unwrap();

    assert_eq!(snapshot.last_processed_block, 8);
    let operators: Vec<_> = snapshot.rows.iter().map(|r| r.operator.clone()).collect();
    assert_eq!(operators, vec![address(1), address(2), address(3)]);

    let idle = &snapshot.rows[2];
    assert_eq!(idle.actual_delegations, "0");
    assert_eq!(idle.total_delegate_operations, 0);
    assert!(idle.current_delegators.is_empty());

    assert_eq!(snapshot.rows[0].uptime, Some(dec!(100.0)));
    assert_eq!(snapshot.rows[1].uptime, Some(dec!(87.3)));
}

#[tokio::test]
async fn test_fallback_rebuild_matches_background_refresh() {
    let (state, _clock) = populated_state().await;
    assert!(state.current_snapshot().await.is_none());

    let fallback = state.get_or_refresh().await.unwrap();
    let refreshed = state.refresh_now().await.unwrap();

    assert_eq!(*fallback, *refreshed);
}

#[tokio::test]
async fn test_live_snapshot_is_served_from_cache() {
    let (state, _clock) = populated_state().await;
    let refreshed = state.refresh_now().await.unwrap();
    let served = state.get_or_refresh().await.unwrap();
    assert!(Arc::ptr_eq(&refreshed, &served));
}

#[tokio::test]
async fn test_expired_snapshot_is_rebuilt_on_read() {
    let (state, clock) = populated_state().await;
    let first = state.refresh_now().await.unwrap();
    assert!(state.current_snapshot().await.is_some());

    clock.advance(chrono::Duration::seconds(1_101));
    assert!(state.current_snapshot().await.is_none());

    let rebuilt = state.get_or_refresh().await.unwrap();
    assert_eq!(rebuilt.generated_at, clock.now());
    assert!(rebuilt.generated_at > first.generated_at);
    assert_eq!(rebuilt.rows, first.rows);
}

#[tokio::test]
async fn test_operator_history_is_newest_first() {
    let (state, _clock) = populated_state().await;
    let history = state
        .operator_history(&address(1).to_uppercase())
        .await
        .unwrap();

    assert_eq!(history.len(), 5);
    assert_eq!(history[0].block_number, 6);
    assert_eq!(history[0].amount, U256::from(5));
    assert_eq!(history[4].block_number, 2);
    assert_eq!(history[4].amount, U256::from(10));
}

#[tokio::test]
async fn test_daily_counts_and_top_guardians() {
    let (state, _clock) = populated_state().await;

    let days = state.daily_event_counts().await.unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!((days[0].mint, days[0].delegations, days[0].undelegations), (1, 2, 2));
    assert_eq!(days[0].total, 5);
    assert_eq!(days[1].delegations, 2);

    let top = state.top_guardians(1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].guardian, address(8));
    assert_eq!(top[0].net_delegated, "20");
}

#[tokio::test]
async fn test_delegation_distribution_groups_operators_by_net_amount() {
    let (state, _clock) = populated_state().await;
    let buckets = state.delegation_distribution().await.unwrap();

    let pairs: Vec<_> = buckets
        .iter()
        .map(|b| (b.net_delegated.as_str(), b.operators))
        .collect();
    assert_eq!(pairs, vec![("20", 1), ("12", 1)]);
}

#[tokio::test]
async fn test_registry_distributions() {
    let (state, _clock) = populated_state().await;

    let statuses: Vec<_> = state
        .status_counts()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.status, c.nodes))
        .collect();
    assert_eq!(statuses, vec![(Some(true), 2), (Some(false), 1)]);

    let uptimes: Vec<_> = state
        .uptime_distribution()
        .await
        .unwrap()
        .into_iter()
        .map(|b| (b.uptime, b.nodes))
        .collect();
    assert_eq!(
        uptimes,
        vec![(Some(dec!(100)), 1), (Some(dec!(87)), 1), (Some(dec!(10)), 1)]
    );

    let fees: Vec<_> = state
        .fee_distribution()
        .await
        .unwrap()
        .into_iter()
        .map(|b| (b.fee, b.nodes))
        .collect();
    assert_eq!(fees, vec![(Some(5.0), 1), (Some(3.0), 1), (Some(1.0), 1)]);
}

#[tokio::test]
async fn test_promotions_require_ledger_activity() {
    let (state, _clock) = populated_state().await;

    let directory = FakeDirectory::new(vec![listing(4, true, 2.0, 99.0)], 99_999_999);
    NodeRegistrySynchronizer::new(state.registry.clone(), directory, test_config(3).node_sync)
        .run_once()
        .await
        .unwrap();
    assert!(state.set_promotion(&address(4), "Brand new").await.unwrap());
    assert!(state.set_promotion(&address(1), "Low fees").await.unwrap());

    let operators: Vec<_> = state
        .promotions()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.operator)
        .collect();
    assert_eq!(operators, vec![address(1)]);
}

#[tokio::test]
async fn test_promotions_list_advertised_nodes_with_capacity() {
    let (state, _clock) = populated_state().await;
    assert!(state.promotions().await.unwrap().is_empty());

    assert!(state.set_promotion(&address(1), "Low fees").await.unwrap());
    assert!(state.set_promotion(&address(2), "Full soon").await.unwrap());
    assert!(state.set_promotion(&address(3), "Offline").await.unwrap());

    let promotions = state.promotions().await.unwrap();
    let operators: Vec<_> = promotions.iter().map(|p| p.operator.clone()).collect();

    // operator 2 sits at capacity (20), operator 3 is offline
    assert_eq!(operators, vec![address(1)]);
    assert_eq!(promotions[0].remaining_capacity, "8");
    assert_eq!(promotions[0].node_text.as_deref(), Some("Low fees"));
}

#[tokio::test]
async fn test_cycle_reports_are_recorded_and_broadcast() {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let clock = manual_clock();
    let chain = FakeChain::new(8, delegation_history());
    let state = AppState::new(db, chain.clone(), as_clock(&clock), &test_config(3));
    state.cursor.ensure().await.unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = JobContext::new(
        state.ledger.clone(),
        as_clock(&clock),
        shutdown_rx,
        Duration::from_secs(60),
    );
    let mut reports = ctx.subscribe();
    let job = BlockCrawlerJob::new(state.crawler.clone());

    chain.fail_next_fetches(1);
    let failed = run_and_record(&job, &ctx).await;
    assert!(matches!(failed.outcome, CycleOutcome::Failed(_)));

    clock.advance(chrono::Duration::seconds(5));
    let completed = run_and_record(&job, &ctx).await;
    assert!(matches!(completed.outcome, CycleOutcome::Completed(_)));

    assert_eq!(reports.recv().await.unwrap().job, jobs::BLOCK_CRAWLER);
    assert!(matches!(
        reports.recv().await.unwrap().outcome,
        CycleOutcome::Completed(_)
    ));

    let statuses = state.job_statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    let status = &statuses[0];
    assert_eq!(status.job_name, jobs::BLOCK_CRAWLER);
    assert_eq!(status.success_count, 1);
    assert_eq!(status.error_count, 1);
    assert_eq!(status.last_error, None);
    assert_eq!(status.last_success_at, Some(clock.now()));
}

#[tokio::test]
async fn test_periodic_job_stops_on_shutdown() {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let clock = manual_clock();
    let state = AppState::new(db, FakeChain::new(8, delegation_history()), as_clock(&clock), &test_config(3));
    state.cursor.ensure().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = JobContext::new(
        state.ledger.clone(),
        as_clock(&clock),
        shutdown_rx,
        Duration::from_secs(60),
    );
    let mut reports = ctx.subscribe();

    let handle = spawn_periodic(
        Arc::new(BlockCrawlerJob::new(state.crawler.clone())),
        ctx,
        Duration::from_secs(3600),
    );

    let first = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("job never reported")
        .unwrap();
    assert!(matches!(first.outcome, CycleOutcome::Completed(_)));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("job did not stop")
        .unwrap();

    assert_eq!(state.cursor.read().await.unwrap().last_processed_block, 8);
}
