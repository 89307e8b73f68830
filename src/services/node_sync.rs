//! Node registry synchronizer
//!
//! Walks the node monitor page by page and upserts every listing into the
//! registry. A sentinel check runs first: a page far past any real page count
//! that comes back empty means the directory is serving a degenerate dataset,
//! and the whole cycle is skipped rather than overwriting real rows.

use serde::Serialize;
use std::sync::Arc;

use crate::config::NodeSyncConfig;
use crate::error::{with_deadline, IndexerResult};
use crate::services::node_monitor::NodeDirectory;
use crate::services::node_registry::NodeRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeSyncOutcome {
    /// Sentinel check tripped; registry untouched.
    Skipped { reason: String },
    Completed {
        pages: u32,
        upserted: usize,
        /// True when `max_pages` stopped the walk before an empty page
        truncated: bool,
    },
}

pub struct NodeRegistrySynchronizer {
    registry: NodeRegistry,
    directory: Arc<dyn NodeDirectory>,
    config: NodeSyncConfig,
}

impl NodeRegistrySynchronizer {
    pub fn new(
        registry: NodeRegistry,
        directory: Arc<dyn NodeDirectory>,
        config: NodeSyncConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            config,
        }
    }

    /// Returns `true` when the directory looks degenerate.
    async fn sentinel_trips(&self) -> IndexerResult<bool> {
        let sentinel = with_deadline(
            "node monitor sentinel check",
            self.config.http_timeout,
            self.directory
                .fetch_page(self.config.sentinel_page, self.config.page_size),
        )
        .await?;

        tracing::debug!(
            sentinel_page = self.config.sentinel_page,
            count = sentinel.len(),
            "Node monitor sentinel check"
        );
        Ok(sentinel.is_empty())
    }

    /// One sync cycle. Rows upserted before a mid-walk failure stay written;
    /// each upsert is atomic and the next cycle rewrites them anyway.
    pub async fn run_once(&self) -> IndexerResult<NodeSyncOutcome> {
        if self.config.sentinel_check && self.sentinel_trips().await? {
            tracing::warn!(
                sentinel_page = self.config.sentinel_page,
                "Node monitor returned no nodes for the sentinel page, skipping node sync"
            );
            return Ok(NodeSyncOutcome::Skipped {
                reason: format!(
                    "sentinel page {} returned no nodes",
                    self.config.sentinel_page
                ),
            });
        }

        let mut upserted = 0;
        let mut pages = 0;
        let mut page = 1;

        loop {
            if page > self.config.max_pages {
                tracing::warn!(
                    max_pages = self.config.max_pages,
                    "Node monitor never returned an empty page, stopping at page limit"
                );
                return Ok(NodeSyncOutcome::Completed {
                    pages,
                    upserted,
                    truncated: true,
                });
            }

            let nodes = with_deadline(
                "node monitor page",
                self.config.http_timeout,
                self.directory.fetch_page(page, self.config.page_size),
            )
            .await?;

            if nodes.is_empty() {
                break;
            }

            for node in &nodes {
                self.registry.upsert_listing(node).await?;
            }

            upserted += nodes.len();
            pages += 1;
            page += 1;
        }

        tracing::info!(pages, upserted, "Node registry sync complete");

        Ok(NodeSyncOutcome::Completed {
            pages,
            upserted,
            truncated: false,
        })
    }
}
