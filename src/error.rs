//! Indexer error type.
//!
//! Library operations return [`IndexerError`]. Background jobs turn it into a
//! [`crate::jobs::CycleReport`] instead of propagating it, so a failed cycle
//! never takes the process down.

use sea_orm::DbErr;

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Storage failure (connection, constraint other than the dedup key, ...).
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    /// Chain RPC transport or JSON-RPC error.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// An external call did not finish within its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    /// HTTP transport failure towards the node monitor.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node monitor answered with a non-success status.
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Attempt to move the crawl cursor backwards. This is a logic error.
    #[error("cursor regression: current block {current}, attempted {attempted}")]
    CursorRegression { current: i64, attempted: i64 },

    /// The cursor row is missing; `CursorStore::ensure` was never called.
    #[error("cursor row is missing")]
    CursorMissing,

    /// A persisted row could not be read back into a domain value.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("invalid config: {0}")]
    Config(String),

    /// A coalesced snapshot rebuild failed; shared by every waiting caller.
    #[error("snapshot rebuild failed: {0}")]
    SnapshotRebuild(std::sync::Arc<IndexerError>),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

/// Run `future` under a deadline; running out of time becomes
/// [`IndexerError::Timeout`].
pub async fn with_deadline<T, F>(
    operation: &'static str,
    limit: std::time::Duration,
    future: F,
) -> IndexerResult<T>
where
    F: std::future::Future<Output = IndexerResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(IndexerError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}
