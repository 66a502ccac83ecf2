//! BlockScanner processor.
//!
//! The BlockScanner is responsible for:
//! - Polling the node's latest height
//! - Fetching the next unprocessed block and handing its transactions, then
//!   the block itself, to a `BlockHandler`
//! - Advancing the local height by exactly one per processed block
//!
//! Fetch errors are logged and retried on the next tick; the scanner never
//! stops itself.

use super::coordinator::{ChainPipeline, PipelineFactory};
use super::dispatcher::{BlockHandler, Dispatcher};
use super::status::PipelineStatus;
use super::{RunningTask, ScannerError, sleep_or_shutdown};
use crate::chain::{BlockSource, ChainError};
use crate::config::ScannerConfig;
use crate::ledger::LedgerStore;
use async_trait::async_trait;
use compact_str::CompactString;
use poolscan_sdk::objects::ChainStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

pub struct BlockScanner<S, H> {
    chain: CompactString,
    source: Arc<S>,
    handler: Arc<Mutex<H>>,
    status: Arc<PipelineStatus>,
    /// Last fully processed height.
    height: Arc<AtomicI64>,
    poll_interval: Duration,
    running: Option<RunningTask>,
}

impl<S, H> BlockScanner<S, H>
where
    S: BlockSource + 'static,
    H: BlockHandler + 'static,
{
    pub fn new(
        chain: impl Into<CompactString>,
        source: Arc<S>,
        handler: H,
        status: Arc<PipelineStatus>,
        config: &ScannerConfig,
    ) -> Self {
        Self {
            chain: chain.into(),
            source,
            handler: Arc::new(Mutex::new(handler)),
            status,
            height: Arc::new(AtomicI64::new(config.start_height)),
            poll_interval: config.poll_interval,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn get_height(&self) -> i64 {
        self.height.load(Ordering::SeqCst)
    }

    /// Seeds the last processed height. Rejected while running.
    pub fn set_height(&mut self, height: i64) -> Result<(), ScannerError> {
        if self.is_running() {
            return Err(ScannerError::AlreadyRunning);
        }
        self.height.store(height, Ordering::SeqCst);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ScannerError> {
        if self.is_running() {
            return Err(ScannerError::AlreadyRunning);
        }
        let chain = self.chain.clone();
        let source = self.source.clone();
        let handler = self.handler.clone();
        let status = self.status.clone();
        let height = self.height.clone();
        let poll_interval = self.poll_interval;
        self.running = Some(RunningTask::spawn(move |shutdown_rx| {
            run(chain, source, handler, status, height, poll_interval, shutdown_rx)
        }));
        info!(chain = %self.chain, height = self.get_height(), "BlockScanner started");
        Ok(())
    }

    /// Stops the loop and waits for the in-flight poll to finish.
    pub async fn stop(&mut self) -> Result<(), ScannerError> {
        let running = self.running.take().ok_or(ScannerError::NotRunning)?;
        running.shutdown().await?;
        info!(chain = %self.chain, height = self.get_height(), "BlockScanner stopped");
        Ok(())
    }
}

async fn run<S: BlockSource, H: BlockHandler>(
    chain: CompactString,
    source: Arc<S>,
    handler: Arc<Mutex<H>>,
    status: Arc<PipelineStatus>,
    height: Arc<AtomicI64>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match poll_once(source.as_ref(), &handler, &height).await {
            Ok(true) => {
                status.set_healthy(true);
                continue;
            }
            Ok(false) => status.set_healthy(true),
            Err(e) => {
                status.set_healthy(false);
                error!(chain = %chain, height = height.load(Ordering::SeqCst), error = %e, "Block fetch failed");
            }
        }
        if sleep_or_shutdown(&mut shutdown_rx, poll_interval).await {
            break;
        }
    }
}

/// Processes the next block if the node has one. Returns whether the height
/// advanced.
async fn poll_once<S: BlockSource, H: BlockHandler>(
    source: &S,
    handler: &Mutex<H>,
    height: &AtomicI64,
) -> Result<bool, ChainError> {
    let current = height.load(Ordering::SeqCst);
    let latest = source.latest_height().await?;
    if current >= latest {
        return Ok(false);
    }
    let block = source.block(current + 1).await?;
    debug!(height = block.height, txs = block.txs.len(), "Dispatching block");

    let mut handler = handler.lock().await;
    for events in block.txs {
        handler.on_tx(block.height, events).await;
    }
    handler
        .on_block(block.height, block.time, block.begin, block.end)
        .await;
    height.store(current + 1, Ordering::SeqCst);
    Ok(true)
}

#[async_trait]
impl<S> ChainPipeline for BlockScanner<S, Dispatcher>
where
    S: BlockSource + 'static,
{
    async fn start(&mut self) -> Result<(), ScannerError> {
        BlockScanner::start(self)
    }

    async fn stop(&mut self) -> Result<(), ScannerError> {
        BlockScanner::stop(self).await
    }

    fn status(&self) -> ChainStatus {
        self.status.snapshot()
    }
}

/// Builds a Tendermint-driven pipeline per chain.
pub struct BlockPipelineFactory<S> {
    source: Arc<S>,
    store: Arc<dyn LedgerStore>,
    config: ScannerConfig,
}

impl<S> BlockPipelineFactory<S> {
    pub fn new(source: Arc<S>, store: Arc<dyn LedgerStore>, config: ScannerConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }
}

#[async_trait]
impl<S> PipelineFactory for BlockPipelineFactory<S>
where
    S: BlockSource + 'static,
{
    /// Resumes after the highest height already stored for `chain`.
    async fn create(&self, chain: &str) -> Result<Box<dyn ChainPipeline>, ScannerError> {
        let status = Arc::new(PipelineStatus::new(chain));
        let dispatcher = Dispatcher::new(chain, self.store.clone(), status.clone()).await?;
        let stored = self.store.max_height(chain).await?;
        let mut scanner = BlockScanner::new(
            chain,
            self.source.clone(),
            dispatcher,
            status,
            &self.config,
        );
        scanner.set_height(stored.max(self.config.start_height))?;
        Ok(Box::new(scanner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockResults;
    use crate::events::{Attributes, RawEvent};
    use crate::ledger::MemoryLedger;
    use poolscan_sdk::objects::Asset;
    use std::sync::Mutex as StdMutex;

    /// A node that is always `tip` blocks high.
    struct FakeSource {
        tip: i64,
        fail_at: Option<i64>,
    }

    #[async_trait]
    impl BlockSource for FakeSource {
        async fn latest_height(&self) -> Result<i64, ChainError> {
            Ok(self.tip)
        }

        async fn block(&self, height: i64) -> Result<BlockResults, ChainError> {
            if self.fail_at == Some(height) {
                return Err(ChainError::Format("flaky node".to_owned()));
            }
            Ok(BlockResults {
                height,
                time: height * 5,
                txs: vec![vec![add()]],
                ..Default::default()
            })
        }
    }

    fn add() -> RawEvent {
        let attrs: Attributes = [("pool", "BNB.BNB"), ("id", "A"), ("coin", "5 BNB.BNB")]
            .into_iter()
            .collect();
        RawEvent::new("add", attrs)
    }

    #[derive(Default, Clone)]
    struct Recorder {
        calls: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl BlockHandler for Recorder {
        async fn on_tx(&mut self, height: i64, events: Vec<RawEvent>) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("tx {height} {}", events.len()));
        }

        async fn on_block(&mut self, height: i64, time: i64, _: Vec<RawEvent>, _: Vec<RawEvent>) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("block {height} {time}"));
        }
    }

    fn scanner(source: FakeSource, recorder: Recorder) -> BlockScanner<FakeSource, Recorder> {
        let config = ScannerConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        BlockScanner::new(
            "THOR",
            Arc::new(source),
            recorder,
            Arc::new(PipelineStatus::new("THOR")),
            &config,
        )
    }

    async fn wait_for_height(scanner: &BlockScanner<FakeSource, Recorder>, height: i64) {
        for _ in 0..400 {
            if scanner.get_height() >= height {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_height_advances_one_block_at_a_time() {
        let recorder = Recorder::default();
        let mut scanner = scanner(FakeSource { tip: 13, fail_at: None }, recorder.clone());
        scanner.set_height(10).unwrap();
        scanner.start().unwrap();
        wait_for_height(&scanner, 13).await;
        scanner.stop().await.unwrap();

        assert_eq!(scanner.get_height(), 13);
        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            [
                "tx 11 1", "block 11 55", "tx 12 1", "block 12 60", "tx 13 1", "block 13 65"
            ]
        );
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let mut scanner = scanner(FakeSource { tip: 0, fail_at: None }, Recorder::default());
        assert!(matches!(scanner.stop().await, Err(ScannerError::NotRunning)));
        scanner.start().unwrap();
        assert!(matches!(scanner.start(), Err(ScannerError::AlreadyRunning)));
        assert!(matches!(scanner.set_height(5), Err(ScannerError::AlreadyRunning)));
        scanner.stop().await.unwrap();
        scanner.start().unwrap();
        scanner.stop().await.unwrap();
        assert!(matches!(scanner.stop().await, Err(ScannerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_fetch_errors_do_not_advance() {
        let mut scanner = scanner(
            FakeSource {
                tip: 10,
                fail_at: Some(2),
            },
            Recorder::default(),
        );
        scanner.start().unwrap();
        wait_for_height(&scanner, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scanner.is_running());
        scanner.stop().await.unwrap();
        assert_eq!(scanner.get_height(), 1);
        assert!(!scanner.status.snapshot().is_healthy);
    }

    #[tokio::test]
    async fn test_restart_resumes_after_stored_height() {
        let ledger = Arc::new(MemoryLedger::new());
        let config = ScannerConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let factory = BlockPipelineFactory::new(
            Arc::new(FakeSource { tip: 3, fail_at: None }),
            ledger.clone(),
            config,
        );

        let mut first = factory.create("THOR").await.unwrap();
        first.start().await.unwrap();
        for _ in 0..400 {
            if ledger.events().await.len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        first.stop().await.unwrap();
        assert_eq!(ledger.max_height("THOR").await.unwrap(), 3);

        let mut second = factory.create("THOR").await.unwrap();
        second.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        second.stop().await.unwrap();

        assert_eq!(ledger.events().await.len(), 3);
        let pool: Asset = "BNB.BNB".parse().unwrap();
        let basics = ledger.pool_basics(&pool, None).await.unwrap();
        assert_eq!(basics.asset_depth, 15);
    }
}
