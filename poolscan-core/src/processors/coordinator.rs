//! ChainSetCoordinator processor.
//!
//! The ChainSetCoordinator is responsible for:
//! - Periodically reading the active chain set from a `ChainDirectory`
//! - Creating and starting one pipeline per newly seen chain
//! - Stopping every pipeline it started when it is stopped itself
//!
//! Pipelines are never retired while the coordinator runs.

use super::{RunningTask, ScannerError, sleep_or_shutdown};
use crate::chain::ChainDirectory;
use async_trait::async_trait;
use compact_str::CompactString;
use poolscan_sdk::objects::ChainStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

/// One running per-chain scanner.
#[async_trait]
pub trait ChainPipeline: Send + Sync {
    async fn start(&mut self) -> Result<(), ScannerError>;

    async fn stop(&mut self) -> Result<(), ScannerError>;

    fn status(&self) -> ChainStatus;
}

#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create(&self, chain: &str) -> Result<Box<dyn ChainPipeline>, ScannerError>;
}

type Pipelines = Arc<Mutex<HashMap<CompactString, Box<dyn ChainPipeline>>>>;

pub struct ChainSetCoordinator {
    directory: Arc<dyn ChainDirectory>,
    factory: Arc<dyn PipelineFactory>,
    pipelines: Pipelines,
    refresh_interval: Duration,
    running: Mutex<Option<RunningTask>>,
}

impl ChainSetCoordinator {
    pub fn new(
        directory: Arc<dyn ChainDirectory>,
        factory: Arc<dyn PipelineFactory>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            directory,
            factory,
            pipelines: Arc::new(Mutex::new(HashMap::new())),
            refresh_interval,
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), ScannerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ScannerError::AlreadyRunning);
        }
        let directory = self.directory.clone();
        let factory = self.factory.clone();
        let pipelines = self.pipelines.clone();
        let refresh_interval = self.refresh_interval;
        *running = Some(RunningTask::spawn(move |shutdown_rx| {
            run(directory, factory, pipelines, refresh_interval, shutdown_rx)
        }));
        info!("ChainSetCoordinator started");
        Ok(())
    }

    /// Stops the discovery task, then every pipeline it started.
    ///
    /// The pipeline map is only locked while it is drained, so status reads
    /// stay responsive while the pipelines wind down.
    pub async fn stop(&self) -> Result<(), ScannerError> {
        let running = self
            .running
            .lock()
            .await
            .take()
            .ok_or(ScannerError::NotRunning)?;
        running.shutdown().await?;

        let drained: Vec<_> = self.pipelines.lock().await.drain().collect();
        for (chain, mut pipeline) in drained {
            if let Err(e) = pipeline.stop().await {
                error!(chain = %chain, error = %e, "Failed to stop pipeline");
            }
        }
        info!("ChainSetCoordinator stopped");
        Ok(())
    }

    /// Status of every running pipeline, ordered by chain.
    pub async fn statuses(&self) -> Vec<ChainStatus> {
        let pipelines = self.pipelines.lock().await;
        let mut statuses: Vec<_> = pipelines.values().map(|pipeline| pipeline.status()).collect();
        statuses.sort_by(|a, b| a.chain.cmp(&b.chain));
        statuses
    }
}

async fn run(
    directory: Arc<dyn ChainDirectory>,
    factory: Arc<dyn PipelineFactory>,
    pipelines: Pipelines,
    refresh_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        refresh(directory.as_ref(), factory.as_ref(), &pipelines).await;
        if sleep_or_shutdown(&mut shutdown_rx, refresh_interval).await {
            break;
        }
    }
}

async fn refresh(directory: &dyn ChainDirectory, factory: &dyn PipelineFactory, pipelines: &Pipelines) {
    let chains = match directory.active_chains().await {
        Ok(chains) => chains,
        Err(e) => {
            warn!(error = %e, "Failed to read the active chain set");
            return;
        }
    };
    let known: Vec<CompactString> = pipelines.lock().await.keys().cloned().collect();
    // only this task inserts, so pipelines are built without holding the map
    for chain in chains.into_iter().filter(|chain| !known.contains(chain)) {
        let mut pipeline = match factory.create(&chain).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(chain = %chain, error = %e, "Failed to create pipeline");
                continue;
            }
        };
        if let Err(e) = pipeline.start().await {
            error!(chain = %chain, error = %e, "Failed to start pipeline");
            continue;
        }
        info!(chain = %chain, "Started pipeline for new chain");
        pipelines.lock().await.insert(chain, pipeline);
    }
}
