//! Poolscan Server
//!
//! Scans a THORChain-style node, decodes its events into a pool ledger and
//! reports per-chain pipeline health.

mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, LoadedConfig, get_database_url};
use poolscan_core::chain::{ChainDirectory, StaticChains, TendermintClient, ThorNodeClient};
use poolscan_core::config::PipelineSource;
use poolscan_core::ledger::{LedgerStore, PgLedger};
use poolscan_core::processors::{
    BlockPipelineFactory, ChainSetCoordinator, FeedPipelineFactory, PipelineFactory,
};
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Poolscan - chain event scanner and pool ledger
#[derive(Parser, Debug)]
#[command(name = "poolscan-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./poolscan.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting poolscan-server v{}", env!("CARGO_PKG_VERSION"));

    let loaded_config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(loaded_config.max_connections)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let listen_addr = loaded_config.listen;
    let coordinator = build_coordinator(&loaded_config, db_pool.clone())?;
    coordinator.start().await?;

    let state = AppState::new(db_pool.clone(), coordinator);
    let router = build_router(state.clone());

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    tracing::info!("Stopping chain pipelines...");
    if let Err(e) = state.coordinator.stop().await {
        tracing::error!("Failed to stop coordinator: {}", e);
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Wires the chain clients, the ledger and the pipeline factory for the
/// configured source.
fn build_coordinator(
    config: &LoadedConfig,
    db_pool: sqlx::PgPool,
) -> anyhow::Result<ChainSetCoordinator> {
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(db_pool));
    let thornode = Arc::new(ThorNodeClient::new(&config.node)?);
    let static_chains = &config.coordinator.static_chains;

    let factory: Arc<dyn PipelineFactory> = match config.coordinator.source {
        PipelineSource::Feed => Arc::new(FeedPipelineFactory::new(
            thornode.clone(),
            store,
            config.scanner.clone(),
        )),
        PipelineSource::Blocks => Arc::new(BlockPipelineFactory::new(
            Arc::new(TendermintClient::new(&config.node)?),
            store,
            config.scanner.clone(),
        )),
    };
    let directory: Arc<dyn ChainDirectory> = if static_chains.is_empty() {
        thornode
    } else {
        Arc::new(StaticChains(static_chains.clone()))
    };

    tracing::info!(
        source = ?config.coordinator.source,
        chains = ?static_chains,
        "Chain pipelines configured"
    );
    Ok(ChainSetCoordinator::new(
        directory,
        factory,
        config.coordinator.refresh_interval,
    ))
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
