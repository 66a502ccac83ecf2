//! TOML file configuration structures.
//!
//! These structs directly map to the `poolscan.toml` file format.

use compact_str::CompactString;
use poolscan_core::config::PipelineSource;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub node: NodeConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

/// Chain node endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub thornode_url: Url,
    pub tendermint_url: Url,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Whether block_results attributes arrive base64 encoded.
    #[serde(default = "default_true")]
    pub base64_attributes: bool,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_block_interval_secs")]
    pub block_interval_secs: u64,
    #[serde(default)]
    pub start_height: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_backoff_secs: default_retry_backoff_secs(),
            block_interval_secs: default_block_interval_secs(),
            start_height: 0,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_backoff_secs() -> u64 {
    5
}

fn default_block_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_source")]
    pub source: PipelineSource,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Fixed chain set. Exactly one chain for the block source; replaces discovery
    /// for the feed source when non-empty.
    #[serde(default)]
    pub static_chains: Vec<CompactString>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            refresh_interval_secs: default_refresh_interval_secs(),
            static_chains: Vec::new(),
        }
    }
}

fn default_source() -> PipelineSource {
    PipelineSource::Feed
}

fn default_refresh_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[database]
max_connections = 4

[node]
thornode_url = "http://localhost:1317"
tendermint_url = "http://localhost:26657"
request_timeout_secs = 3
base64_attributes = false

[scanner]
poll_interval_ms = 250
retry_backoff_secs = 2
block_interval_secs = 6
start_height = 100

[coordinator]
source = "blocks"
refresh_interval_secs = 30
static_chains = ["THOR"]
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.node.thornode_url.port(), Some(1317));
        assert!(!config.node.base64_attributes);
        assert_eq!(config.scanner.poll_interval_ms, 250);
        assert_eq!(config.scanner.start_height, 100);
        assert_eq!(config.coordinator.source, PipelineSource::Blocks);
        assert_eq!(config.coordinator.static_chains, ["THOR"]);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_str = r#"
[node]
thornode_url = "http://localhost:1317"
tendermint_url = "http://localhost:26657"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.node.request_timeout_secs, 10);
        assert!(config.node.base64_attributes);
        assert_eq!(config.scanner.retry_backoff_secs, 5);
        assert_eq!(config.coordinator.source, PipelineSource::Feed);
        assert!(config.coordinator.static_chains.is_empty());
    }

    #[test]
    fn test_missing_node_section_is_rejected() {
        assert!(toml::from_str::<FileConfig>("[server]\nlisten = \"127.0.0.1:1\"").is_err());
    }
}
