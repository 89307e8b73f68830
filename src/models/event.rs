use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three staking contract events the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Delegate,
    Undelegate,
    Mint,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Delegate => "DELEGATE",
            EventKind::Undelegate => "UNDELEGATE",
            EventKind::Mint => "MINT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DELEGATE" => Ok(EventKind::Delegate),
            "UNDELEGATE" => Ok(EventKind::Undelegate),
            "MINT" => Ok(EventKind::Mint),
            other => Err(format!("unknown event type {:?}", other)),
        }
    }
}

/// One entry of an `eth_getLogs` response, kept as the node sent it.
///
/// Every field is optional or defaulted so that a single odd log can never
/// fail deserialization of the whole window; the decoder rejects it instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_timestamp: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
}

/// A decoded delegation ledger entry.
///
/// Identity is `(transaction_hash, log_index)`. Addresses and hashes are
/// lowercase `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    /// Chain-native log index as received (hex quantity, e.g. `0x1a`)
    pub log_index: String,
    pub guardian: String,
    /// `None` for MINT
    pub operator: Option<String>,
    pub amount: U256,
    pub timestamp: DateTime<Utc>,
}

/// Numeric position of a log inside its block, from its hex log index.
pub fn log_position(log_index: &str) -> u64 {
    let digits = log_index.strip_prefix("0x").unwrap_or(log_index);
    u64::from_str_radix(digits, 16).unwrap_or(0)
}

impl DomainEvent {
    pub fn log_position(&self) -> u64 {
        log_position(&self.log_index)
    }

    /// Chronological order: block time first, then chain position.
    pub fn ordering_key(&self) -> (DateTime<Utc>, u64, u64) {
        (self.timestamp, self.block_number, self.log_position())
    }
}
