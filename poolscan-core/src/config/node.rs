//! Chain node endpoints.

use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// THORNode REST endpoint (event feed, tx lookup, pool addresses).
    pub thornode_url: Url,
    /// Tendermint RPC endpoint (status, block, block_results, genesis).
    pub tendermint_url: Url,
    /// Upper bound for every outgoing request.
    pub request_timeout: Duration,
    /// Whether block_results attribute keys and values arrive base64 encoded.
    pub base64_attributes: bool,
}
