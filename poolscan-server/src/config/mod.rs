//! Configuration module for poolscan-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments,
//! and environment variables, and turns it into the runtime config
//! structs the pipelines are built from.

pub mod file;

use crate::config::file::FileConfig;
use poolscan_core::config::{CoordinatorConfig, NodeConfig, PipelineSource, ScannerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub max_connections: u32,
    pub node: NodeConfig,
    pub scanner: ScannerConfig,
    pub coordinator: CoordinatorConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Reads the TOML file, applies CLI overrides and validates the result.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let intervals = [
        ("node.request_timeout_secs", config.node.request_timeout_secs),
        ("scanner.poll_interval_ms", config.scanner.poll_interval_ms),
        ("scanner.retry_backoff_secs", config.scanner.retry_backoff_secs),
        ("scanner.block_interval_secs", config.scanner.block_interval_secs),
        (
            "coordinator.refresh_interval_secs",
            config.coordinator.refresh_interval_secs,
        ),
    ];
    if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::ValidationError(format!("{name} must be positive")));
    }
    if config.scanner.start_height < 0 {
        return Err(ConfigError::ValidationError(
            "scanner.start_height must not be negative".to_owned(),
        ));
    }
    if config.database.max_connections == 0 {
        return Err(ConfigError::ValidationError(
            "database.max_connections must be positive".to_owned(),
        ));
    }
    // every block pipeline reads the same node, so a second chain would
    // store each event twice
    if config.coordinator.source == PipelineSource::Blocks
        && config.coordinator.static_chains.len() != 1
    {
        return Err(ConfigError::ValidationError(
            "the blocks source needs exactly one chain in coordinator.static_chains".to_owned(),
        ));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let FileConfig {
        server,
        database,
        node,
        scanner,
        coordinator,
    } = file_config;

    LoadedConfig {
        listen: server.listen,
        max_connections: database.max_connections,
        node: NodeConfig {
            thornode_url: node.thornode_url,
            tendermint_url: node.tendermint_url,
            request_timeout: Duration::from_secs(node.request_timeout_secs),
            base64_attributes: node.base64_attributes,
        },
        scanner: ScannerConfig {
            poll_interval: Duration::from_millis(scanner.poll_interval_ms),
            retry_backoff: Duration::from_secs(scanner.retry_backoff_secs),
            block_interval: Duration::from_secs(scanner.block_interval_secs),
            start_height: scanner.start_height,
        },
        coordinator: CoordinatorConfig {
            refresh_interval: Duration::from_secs(coordinator.refresh_interval_secs),
            source: coordinator.source,
            static_chains: coordinator
                .static_chains
                .into_iter()
                .map(|chain| chain.to_uppercase().into())
                .collect(),
        },
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = r#"
[node]
thornode_url = "http://localhost:1317"
tendermint_url = "http://localhost:26657"
"#;

    fn loader(listen: Option<SocketAddr>) -> ConfigLoader {
        ConfigLoader::new("poolscan.toml", listen)
    }

    #[test]
    fn test_listen_override_and_conversion() {
        let listen: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let content = format!("{NODE}\n[coordinator]\nstatic_chains = [\"bnb\"]\n");
        let loaded = loader(Some(listen)).load_str(&content).unwrap();
        assert_eq!(loaded.listen, listen);
        assert_eq!(loaded.node.request_timeout, Duration::from_secs(10));
        assert_eq!(loaded.scanner.poll_interval, Duration::from_millis(1000));
        assert_eq!(loaded.coordinator.refresh_interval, Duration::from_secs(60));
        assert_eq!(loaded.coordinator.static_chains, ["BNB"]);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let content = format!("{NODE}\n[scanner]\nretry_backoff_secs = 0\n");
        let err = loader(None).load_str(&content).unwrap_err();
        assert!(err.to_string().contains("scanner.retry_backoff_secs"));
    }

    #[test]
    fn test_blocks_source_needs_chains() {
        let content = format!("{NODE}\n[coordinator]\nsource = \"blocks\"\n");
        assert!(matches!(
            loader(None).load_str(&content),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_blocks_source_takes_a_single_chain() {
        let content = format!(
            "{NODE}\n[coordinator]\nsource = \"blocks\"\nstatic_chains = [\"THOR\", \"BNB\"]\n"
        );
        let err = loader(None).load_str(&content).unwrap_err();
        assert!(err.to_string().contains("exactly one chain"));

        let content = format!("{NODE}\n[coordinator]\nsource = \"blocks\"\nstatic_chains = [\"thor\"]\n");
        let loaded = loader(None).load_str(&content).unwrap();
        assert_eq!(loaded.coordinator.static_chains, ["THOR"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let loader = ConfigLoader::new("/nonexistent/poolscan.toml", None);
        assert!(matches!(loader.load(), Err(ConfigError::IoError(_))));
    }
}
