//! Background processors of the pipeline.
//!
//! - `BlockScanner`: polls Tendermint block results and feeds a `BlockHandler`
//! - `FeedScanner`: polls the node's id-indexed event feed
//! - `Dispatcher`: decodes raw events, correlates settlements, writes the ledger
//! - `ChainSetCoordinator`: discovers chains and runs one pipeline per chain

pub mod block_scanner;
pub mod coordinator;
pub mod dispatcher;
pub mod feed_scanner;
pub mod status;

pub use block_scanner::{BlockPipelineFactory, BlockScanner};
pub use coordinator::{ChainPipeline, ChainSetCoordinator, PipelineFactory};
pub use dispatcher::{BlockHandler, DispatchError, Dispatcher};
pub use feed_scanner::{FeedPipelineFactory, FeedScanner};
pub use status::PipelineStatus;

use crate::ledger::StoreError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),
}

/// A spawned loop and the switch that stops it.
pub(crate) struct RunningTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningTask {
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the loop and waits for it to return.
    pub(crate) async fn shutdown(self) -> Result<(), ScannerError> {
        let _ = self.shutdown_tx.send(true);
        self.handle.await?;
        Ok(())
    }
}

/// Sleeps for `duration` unless shutdown is signalled first. Returns `true`
/// when the caller should stop.
pub(crate) async fn sleep_or_shutdown(
    shutdown_rx: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    if *shutdown_rx.borrow() {
        return true;
    }
    tokio::select! {
        biased;
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
        _ = tokio::time::sleep(duration) => false,
    }
}
