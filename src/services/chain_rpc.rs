//! Chain RPC access for the block crawler.
//!
//! Only two calls are needed: `eth_blockNumber` and an unfiltered
//! `eth_getLogs` over one contract. Logs are requested raw (no topic filter)
//! and decoded client-side by [`crate::services::event_decoder`].

use alloy::{
    primitives::Address,
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use serde_json::json;
use std::str::FromStr;

use crate::error::{IndexerError, IndexerResult};
use crate::models::event::RawLog;

/// Source of chain head and contract logs.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn head_block(&self) -> IndexerResult<u64>;

    /// All logs of the watched contract in `[from_block, to_block]`.
    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> IndexerResult<Vec<RawLog>>;
}

/// JSON-RPC client for the Sophon chain.
pub struct SophonRpcClient {
    provider: RootProvider<Http<Client>>,
    contract_address: Address,
}

impl SophonRpcClient {
    pub fn new(rpc_url: &str, contract_address: &str) -> IndexerResult<Self> {
        let provider = ProviderBuilder::new().on_http(
            rpc_url
                .parse()
                .map_err(|e| IndexerError::Config(format!("Invalid RPC URL {}: {}", rpc_url, e)))?,
        );

        let contract_address = Address::from_str(contract_address).map_err(|e| {
            IndexerError::Config(format!("Invalid contract address {}: {}", contract_address, e))
        })?;

        Ok(Self {
            provider,
            contract_address,
        })
    }
}

#[async_trait]
impl ChainSource for SophonRpcClient {
    async fn head_block(&self) -> IndexerResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| IndexerError::Rpc(format!("eth_blockNumber failed: {}", e)))
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> IndexerResult<Vec<RawLog>> {
        let filter = json!({
            "address": self.contract_address.to_string(),
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "topics": [],
        });

        self.provider
            .raw_request::<_, Vec<RawLog>>("eth_getLogs".into(), (filter,))
            .await
            .map_err(|e| {
                IndexerError::Rpc(format!(
                    "eth_getLogs {}-{} failed: {}",
                    from_block, to_block, e
                ))
            })
    }
}
