//! Sophon node monitor client (`GET /nodes?page=P&per_page=N`).

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::{IndexerError, IndexerResult};
use crate::models::node::{NodeListing, NodePage};

/// Paginated external directory of operator nodes.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// One page of listings. An empty page means the end of the directory.
    async fn fetch_page(&self, page: u32, per_page: u32) -> IndexerResult<Vec<NodeListing>>;
}

#[derive(Clone)]
pub struct NodeMonitorService {
    client: Client,
    base_url: String,
}

impl NodeMonitorService {
    pub fn new(base_url: &str, timeout: Duration) -> IndexerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NodeDirectory for NodeMonitorService {
    async fn fetch_page(&self, page: u32, per_page: u32) -> IndexerResult<Vec<NodeListing>> {
        let url = format!("{}/nodes", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::Upstream { status, body });
        }

        let data: NodePage = response.json().await?;
        let (nodes, rejected) = data.into_listings();
        for e in &rejected {
            tracing::warn!(page, "Skipping malformed node monitor entry: {}", e);
        }
        tracing::debug!(
            page,
            count = nodes.len(),
            rejected = rejected.len(),
            "Fetched node monitor page"
        );

        Ok(nodes)
    }
}
