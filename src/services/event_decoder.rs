//! Staking contract log decoder
//!
//! Maps one raw `eth_getLogs` entry to a [`DomainEvent`]. Decoding is pure and
//! total: anything that is not one of the three known events, or that is
//! malformed, comes back as a [`Rejection`] and is skipped by the crawler.

use alloy::primitives::{b256, B256, U256};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::models::event::{DomainEvent, EventKind, RawLog};

/// Delegated(address indexed guardian, address indexed operator, uint256 amount)
pub const DELEGATE_SIGNATURE: B256 =
    b256!("d9a687098552b070e1e304af176b8a589970267356590b7c7386c2f4fb7d0cc8");

/// Undelegated(address indexed guardian, address indexed operator, uint256 amount)
pub const UNDELEGATE_SIGNATURE: B256 =
    b256!("94784069b8ffa11f7392979bd35691ef746b2c02f3709f7112aae7e2b2f41f23");

/// Minted(address indexed guardian, uint256 amount)
pub const MINT_SIGNATURE: B256 =
    b256!("5e0927d844acaf1b5b3d6fc60c141645a4021a24d501dba971836d488277e084");

/// Why a log did not produce an event. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoTopics,
    UnknownSignature(String),
    MissingField(&'static str),
    MalformedField(&'static str),
    /// Data payload wider than a uint256
    AmountOverflow,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoTopics => write!(f, "log has no topics"),
            Rejection::UnknownSignature(sig) => write!(f, "unknown event signature {}", sig),
            Rejection::MissingField(field) => write!(f, "missing field {}", field),
            Rejection::MalformedField(field) => write!(f, "malformed field {}", field),
            Rejection::AmountOverflow => write!(f, "data payload exceeds 32 bytes"),
        }
    }
}

pub fn kind_for_signature(signature: &B256) -> Option<EventKind> {
    if *signature == DELEGATE_SIGNATURE {
        Some(EventKind::Delegate)
    } else if *signature == UNDELEGATE_SIGNATURE {
        Some(EventKind::Undelegate)
    } else if *signature == MINT_SIGNATURE {
        Some(EventKind::Mint)
    } else {
        None
    }
}

/// Decode a single raw log.
pub fn decode(raw: &RawLog) -> Result<DomainEvent, Rejection> {
    let first = raw.topics.first().ok_or(Rejection::NoTopics)?;
    let signature = parse_word(first, "topics[0]")?;
    let kind = kind_for_signature(&signature)
        .ok_or_else(|| Rejection::UnknownSignature(hex_lower(signature.as_slice())))?;

    let guardian = topic_address(raw, 1)?;
    let operator = match kind {
        EventKind::Mint => None,
        EventKind::Delegate | EventKind::Undelegate => Some(topic_address(raw, 2)?),
    };
    let amount = parse_amount(&raw.data)?;

    let block_number = parse_quantity(raw.block_number.as_deref(), "blockNumber")?;
    if i64::try_from(block_number).is_err() {
        return Err(Rejection::MalformedField("blockNumber"));
    }
    let timestamp = parse_timestamp(raw.block_timestamp.as_deref())?;
    let block_hash = parse_hash(raw.block_hash.as_deref(), "blockHash")?;
    let transaction_hash = parse_hash(raw.transaction_hash.as_deref(), "transactionHash")?;
    let log_index = parse_log_index(raw.log_index.as_deref())?;

    Ok(DomainEvent {
        kind,
        block_number,
        block_hash,
        transaction_hash,
        log_index,
        guardian,
        operator,
        amount,
        timestamp,
    })
}

fn hex_lower(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn parse_word(value: &str, field: &'static str) -> Result<B256, Rejection> {
    B256::from_str(value.trim()).map_err(|_| Rejection::MalformedField(field))
}

/// Indexed address parameters occupy the low 20 bytes of their topic.
fn topic_address(raw: &RawLog, position: usize) -> Result<String, Rejection> {
    let field = match position {
        1 => "topics[1]",
        _ => "topics[2]",
    };
    let topic = raw
        .topics
        .get(position)
        .ok_or(Rejection::MissingField(field))?;
    let word = parse_word(topic, field)?;
    Ok(hex_lower(&word[12..32]))
}

fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// `data` is a single big-endian uint256.
fn parse_amount(data: &str) -> Result<U256, Rejection> {
    let digits = strip_hex_prefix(data);
    if digits.is_empty() {
        return Err(Rejection::MissingField("data"));
    }
    let bytes = hex::decode(digits).map_err(|_| Rejection::MalformedField("data"))?;
    if bytes.len() > 32 {
        return Err(Rejection::AmountOverflow);
    }
    Ok(U256::from_be_slice(&bytes))
}

fn parse_quantity(value: Option<&str>, field: &'static str) -> Result<u64, Rejection> {
    let value = value.ok_or(Rejection::MissingField(field))?;
    let digits = strip_hex_prefix(value);
    if digits.is_empty() {
        return Err(Rejection::MalformedField(field));
    }
    u64::from_str_radix(digits, 16).map_err(|_| Rejection::MalformedField(field))
}

fn parse_timestamp(value: Option<&str>) -> Result<DateTime<Utc>, Rejection> {
    let secs = parse_quantity(value, "blockTimestamp")?;
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or(Rejection::MalformedField("blockTimestamp"))
}

fn parse_hash(value: Option<&str>, field: &'static str) -> Result<String, Rejection> {
    let value = value.ok_or(Rejection::MissingField(field))?;
    let word = parse_word(value, field)?;
    Ok(hex_lower(word.as_slice()))
}

fn parse_log_index(value: Option<&str>) -> Result<String, Rejection> {
    // Validate as a quantity but keep the chain's own spelling as the key
    parse_quantity(value, "logIndex")?;
    Ok(value.unwrap_or_default().trim().to_lowercase())
}
