use alloy::primitives::{I256, U256};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-operator totals reconstructed from the event ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorAggregate {
    pub total_delegated: U256,
    pub total_undelegated: U256,
    pub delegate_count: u64,
    pub undelegate_count: u64,
    pub first_delegate_at: Option<DateTime<Utc>>,
    /// Guardians whose latest event towards this operator is a DELEGATE
    pub current_guardians: BTreeSet<String>,
}

impl OperatorAggregate {
    /// Delegated minus undelegated. Negative only if the ledger is incomplete.
    pub fn net_delegated(&self) -> I256 {
        to_signed(self.total_delegated).saturating_sub(to_signed(self.total_undelegated))
    }
}

pub(crate) fn to_signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

/// One dashboard row: a registry node joined with its ledger aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorStats {
    pub operator: String,
    pub status: Option<bool>,
    pub rewards: String,
    pub fee: Option<f64>,
    /// Rounded to one decimal place
    pub uptime: Option<Decimal>,
    /// Time of the first DELEGATE towards this operator
    pub created_at: Option<DateTime<Utc>>,
    /// Signed base-10 amount
    pub actual_delegations: String,
    pub total_delegate_amount: String,
    pub total_undelegate_amount: String,
    pub total_delegate_operations: u64,
    pub total_undelegate_operations: u64,
    pub current_delegators: Vec<String>,
    pub last_node_update: DateTime<Utc>,
}

/// Time-bounded aggregate view published by the cache refresher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Cursor position the ledger had when the snapshot was built
    pub last_processed_block: u64,
    pub rows: Vec<OperatorStats>,
}

impl CacheSnapshot {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Advertised node that still has delegation capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub operator: String,
    pub node_text: Option<String>,
    pub fee: Option<f64>,
    pub uptime: Option<Decimal>,
    pub actual_delegations: String,
    pub remaining_capacity: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyEventCount {
    pub date: NaiveDate,
    pub mint: u64,
    pub delegations: u64,
    pub undelegations: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianTotal {
    pub guardian: String,
    /// Signed base-10 net delegated amount
    pub net_delegated: String,
}

/// Registry nodes sharing one monitor status; `None` when it was not reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: Option<bool>,
    pub nodes: u64,
}

/// Registry nodes sharing one uptime, rounded to a whole percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeBucket {
    pub uptime: Option<Decimal>,
    pub nodes: u64,
}

/// Registry nodes sharing one commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBucket {
    pub fee: Option<f64>,
    pub nodes: u64,
}

/// Operators sharing one net delegated amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationBucket {
    /// Signed base-10 amount
    pub net_delegated: String,
    pub operators: u64,
}
