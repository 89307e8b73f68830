use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sophon_node_indexer::clock::{Clock, SystemClock};
use sophon_node_indexer::config::IndexerConfig;
use sophon_node_indexer::error::IndexerResult;
use sophon_node_indexer::jobs::{
    aggregate_cache_sync::start_aggregate_cache_job, block_crawler_sync::start_block_crawler_job,
    node_registry_sync::start_node_registry_sync_job, JobContext,
};
use sophon_node_indexer::services::chain_rpc::SophonRpcClient;
use sophon_node_indexer::services::node_monitor::NodeMonitorService;
use sophon_node_indexer::services::node_sync::NodeRegistrySynchronizer;
use sophon_node_indexer::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sophon_node_indexer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Indexer stopped with error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> IndexerResult<()> {
    let config = IndexerConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;

    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let chain = Arc::new(SophonRpcClient::new(
        &config.crawler.rpc_url,
        &config.crawler.contract_address,
    )?);
    let directory = Arc::new(NodeMonitorService::new(
        &config.node_sync.monitor_url,
        config.node_sync.http_timeout,
    )?);

    let state = AppState::new(db.clone(), chain, clock.clone(), &config);

    let cursor = state.cursor.ensure().await?;
    tracing::info!(
        last_processed_block = cursor.last_processed_block,
        "Crawl cursor loaded"
    );

    if config.node_sync.sentinel_check {
        tracing::warn!(
            sentinel_page = config.node_sync.sentinel_page,
            "Node sync is skipped whenever the monitor returns no nodes for the sentinel page; \
             set NODE_SENTINEL_CHECK=false if the monitor answers far pages with an empty list"
        );
    }

    let synchronizer = NodeRegistrySynchronizer::new(
        state.registry.clone(),
        directory,
        config.node_sync.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = JobContext::new(state.ledger.clone(), clock, shutdown_rx, config.max_backoff);

    let handles = vec![
        start_block_crawler_job(state.crawler.clone(), ctx.clone(), config.crawler.interval),
        start_node_registry_sync_job(synchronizer, ctx.clone(), config.node_sync.interval),
        start_aggregate_cache_job(state.cache.clone(), ctx, config.cache.refresh_interval),
    ];

    tracing::info!("Indexer running, waiting for shutdown signal");
    let signal = wait_for_signal().await;
    tracing::info!("Received {}, shutting down", signal);

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Job task ended abnormally: {}", e);
        }
    }

    db.close().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("Failed to register unix signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return "Ctrl+C";
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl+C"
}
