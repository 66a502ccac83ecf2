//! Node-facing sources: Tendermint block results, the THORNode event feed and
//! chain discovery.
//!
//! The scanners only see the traits below, so tests drive them with in-memory
//! fakes.

pub mod tendermint;
pub mod thornode;
mod wire;

pub use tendermint::TendermintClient;
pub use thornode::ThorNodeClient;

use crate::events::RawEvent;
use async_trait::async_trait;
use compact_str::CompactString;
use poolscan_sdk::objects::Tx;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("attribute is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid timestamp: {0}")]
    Time(#[from] time::error::Parse),

    #[error("unexpected response: {0}")]
    Format(String),
}

/// Everything one block contributes, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockResults {
    pub height: i64,
    /// Block time, unix seconds.
    pub time: i64,
    pub begin: Vec<RawEvent>,
    /// One event list per transaction.
    pub txs: Vec<Vec<RawEvent>>,
    pub end: Vec<RawEvent>,
}

#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn latest_height(&self) -> Result<i64, ChainError>;

    async fn block(&self, height: i64) -> Result<BlockResults, ChainError>;
}

#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Genesis time, unix seconds.
    async fn genesis_time(&self) -> Result<i64, ChainError>;

    /// Events of `chain` with an id greater than `id`, in whatever order the
    /// node returns them.
    async fn events_after(&self, chain: &str, id: i64) -> Result<Vec<RawEvent>, ChainError>;

    /// Outbound transactions the node has recorded for an inbound tx.
    async fn settlement_txs(&self, in_tx_id: &str) -> Result<Vec<Tx>, ChainError>;
}

#[async_trait]
pub trait ChainDirectory: Send + Sync {
    async fn active_chains(&self) -> Result<Vec<CompactString>, ChainError>;
}

/// A fixed chain list, for block streaming or when discovery is disabled.
#[derive(Debug, Clone, Default)]
pub struct StaticChains(pub Vec<CompactString>);

#[async_trait]
impl ChainDirectory for StaticChains {
    async fn active_chains(&self) -> Result<Vec<CompactString>, ChainError> {
        Ok(self.0.clone())
    }
}

/// Joins `path` onto `base`, treating `base` as a directory.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, ChainError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base: Url = "http://node:1317/api".parse().unwrap();
        assert_eq!(
            endpoint(&base, "/thorchain/tx/ABC").unwrap().as_str(),
            "http://node:1317/api/thorchain/tx/ABC"
        );
        let root: Url = "http://node:26657".parse().unwrap();
        assert_eq!(endpoint(&root, "status").unwrap().as_str(), "http://node:26657/status");
    }
}
