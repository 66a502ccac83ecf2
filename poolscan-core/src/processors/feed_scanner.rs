//! FeedScanner processor.
//!
//! The FeedScanner is responsible for:
//! - Fetching the genesis time once, to derive event times from heights
//! - Resuming from the highest stored event id of its chain
//! - Polling the node's event feed for newer ids, dispatching them in id
//!   order after filling in missing settlement txs
//! - Reporting health: healthy after a cycle that dispatched events,
//!   unhealthy after a failed fetch
//!
//! Like the block scanner it never stops itself.

use super::coordinator::{ChainPipeline, PipelineFactory};
use super::dispatcher::Dispatcher;
use super::status::PipelineStatus;
use super::{RunningTask, ScannerError, sleep_or_shutdown};
use crate::chain::{ChainError, EventFeed};
use crate::config::ScannerConfig;
use crate::ledger::LedgerStore;
use async_trait::async_trait;
use compact_str::CompactString;
use poolscan_sdk::objects::{ChainStatus, EventType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct FeedScanner<F> {
    chain: CompactString,
    feed: Arc<F>,
    store: Arc<dyn LedgerStore>,
    status: Arc<PipelineStatus>,
    block_interval: Duration,
    retry_backoff: Duration,
    running: Option<RunningTask>,
}

impl<F: EventFeed + 'static> FeedScanner<F> {
    pub fn new(
        chain: impl Into<CompactString>,
        feed: Arc<F>,
        store: Arc<dyn LedgerStore>,
        config: &ScannerConfig,
    ) -> Self {
        let chain = chain.into();
        Self {
            status: Arc::new(PipelineStatus::new(chain.clone())),
            chain,
            feed,
            store,
            block_interval: config.block_interval,
            retry_backoff: config.retry_backoff,
            running: None,
        }
    }

    pub fn status(&self) -> ChainStatus {
        self.status.snapshot()
    }

    pub async fn start(&mut self) -> Result<(), ScannerError> {
        if self.running.is_some() {
            return Err(ScannerError::AlreadyRunning);
        }
        let dispatcher =
            Dispatcher::new(self.chain.clone(), self.store.clone(), self.status.clone()).await?;
        let cycle = FeedCycle {
            chain: self.chain.clone(),
            feed: self.feed.clone(),
            status: self.status.clone(),
            dispatcher,
            block_interval: self.block_interval,
        };
        let retry_backoff = self.retry_backoff;
        self.running = Some(RunningTask::spawn(move |shutdown_rx| {
            cycle.run(retry_backoff, shutdown_rx)
        }));
        info!(chain = %self.chain, "FeedScanner started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), ScannerError> {
        let running = self.running.take().ok_or(ScannerError::NotRunning)?;
        running.shutdown().await?;
        info!(chain = %self.chain, "FeedScanner stopped");
        Ok(())
    }
}

/// State owned by the scanner task.
struct FeedCycle<F> {
    chain: CompactString,
    feed: Arc<F>,
    status: Arc<PipelineStatus>,
    dispatcher: Dispatcher,
    block_interval: Duration,
}

impl<F: EventFeed> FeedCycle<F> {
    async fn run(mut self, retry_backoff: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let genesis = loop {
            match self.feed.genesis_time().await {
                Ok(genesis) => break genesis,
                Err(e) => {
                    self.status.set_healthy(false);
                    error!(chain = %self.chain, error = %e, "Failed to fetch genesis time");
                    if sleep_or_shutdown(&mut shutdown_rx, retry_backoff).await {
                        return;
                    }
                }
            }
        };
        let mut cursor = self.dispatcher.last_id();
        debug!(chain = %self.chain, genesis, cursor, "FeedScanner resuming");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            match self.poll_once(genesis, cursor).await {
                Ok(Some(last_id)) => {
                    cursor = last_id;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    self.status.set_healthy(false);
                    error!(chain = %self.chain, cursor, error = %e, "Event feed fetch failed");
                }
            }
            if sleep_or_shutdown(&mut shutdown_rx, retry_backoff).await {
                break;
            }
        }
    }

    /// Dispatches every event after `cursor`. Returns the new cursor, or
    /// `None` when there was nothing to do.
    async fn poll_once(&mut self, genesis: i64, cursor: i64) -> Result<Option<i64>, ChainError> {
        let mut events = self.feed.events_after(&self.chain, cursor).await?;
        if events.is_empty() {
            return Ok(None);
        }
        events.sort_by_key(|event| event.id);

        let mut last_id = cursor;
        for mut raw in events {
            let awaits_settlement = raw
                .kind
                .parse::<EventType>()
                .is_ok_and(|event_type| event_type.awaits_settlement());
            if awaits_settlement && raw.out_txs.is_empty() {
                if let Some(in_tx) = &raw.in_tx {
                    match self.feed.settlement_txs(&in_tx.id).await {
                        Ok(txs) => raw.out_txs = txs,
                        Err(e) => {
                            warn!(chain = %self.chain, tx_id = %in_tx.id, error = %e, "Settlement lookup failed");
                        }
                    }
                }
            }
            let time = genesis + raw.height * self.block_interval.as_secs() as i64;
            last_id = last_id.max(raw.id.unwrap_or(last_id));
            self.dispatcher.handle(raw, time).await;
        }
        self.status.set_healthy(true);
        Ok(Some(last_id))
    }
}

#[async_trait]
impl<F: EventFeed + 'static> ChainPipeline for FeedScanner<F> {
    async fn start(&mut self) -> Result<(), ScannerError> {
        FeedScanner::start(self).await
    }

    async fn stop(&mut self) -> Result<(), ScannerError> {
        FeedScanner::stop(self).await
    }

    fn status(&self) -> ChainStatus {
        FeedScanner::status(self)
    }
}

/// Builds a feed-driven pipeline per chain.
pub struct FeedPipelineFactory<F> {
    feed: Arc<F>,
    store: Arc<dyn LedgerStore>,
    config: ScannerConfig,
}

impl<F> FeedPipelineFactory<F> {
    pub fn new(feed: Arc<F>, store: Arc<dyn LedgerStore>, config: ScannerConfig) -> Self {
        Self {
            feed,
            store,
            config,
        }
    }
}

#[async_trait]
impl<F: EventFeed + 'static> PipelineFactory for FeedPipelineFactory<F> {
    async fn create(&self, chain: &str) -> Result<Box<dyn ChainPipeline>, ScannerError> {
        Ok(Box::new(FeedScanner::new(
            chain,
            self.feed.clone(),
            self.store.clone(),
            &self.config,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Attributes, RawEvent};
    use crate::ledger::MemoryLedger;
    use poolscan_sdk::objects::{Coin, EventStatus, Tx};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeFeed {
        batches: StdMutex<Vec<Vec<RawEvent>>>,
        fail_next: AtomicBool,
        settlements: Vec<Tx>,
        settlements_fail: bool,
    }

    impl FakeFeed {
        fn new(batches: Vec<Vec<RawEvent>>) -> Self {
            Self {
                batches: StdMutex::new(batches),
                fail_next: AtomicBool::new(false),
                settlements: Vec::new(),
                settlements_fail: false,
            }
        }
    }

    #[async_trait]
    impl EventFeed for FakeFeed {
        async fn genesis_time(&self) -> Result<i64, ChainError> {
            Ok(1_000_000)
        }

        async fn events_after(&self, _: &str, id: i64) -> Result<Vec<RawEvent>, ChainError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ChainError::Format("node unavailable".to_owned()));
            }
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Ok(Vec::new());
            }
            Ok(batches
                .remove(0)
                .into_iter()
                .filter(|event| event.id.unwrap_or_default() > id)
                .collect())
        }

        async fn settlement_txs(&self, _: &str) -> Result<Vec<Tx>, ChainError> {
            if self.settlements_fail {
                return Err(ChainError::Format("tx lookup unavailable".to_owned()));
            }
            Ok(self.settlements.clone())
        }
    }

    fn add_event(id: i64) -> RawEvent {
        let mut raw = RawEvent::new(
            "add",
            [("pool", "BNB.BNB")].into_iter().collect::<Attributes>(),
        );
        raw.id = Some(id);
        raw.height = id * 10;
        raw
    }

    fn config() -> ScannerConfig {
        ScannerConfig {
            retry_backoff: Duration::from_millis(5),
            block_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn wait_for(status: &Arc<PipelineStatus>, processed: i64) {
        for _ in 0..400 {
            if status.snapshot().total_events_processed >= processed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_events_are_dispatched_in_id_order() {
        let store = Arc::new(MemoryLedger::new());
        let feed = Arc::new(FakeFeed::new(vec![vec![add_event(5), add_event(3), add_event(4)]]));
        let mut scanner = FeedScanner::new("BNB", feed, store.clone(), &config());
        scanner.start().await.unwrap();
        wait_for(&scanner.status, 3).await;
        scanner.stop().await.unwrap();

        let events = store.events().await;
        let ids: Vec<_> = events.iter().map(|event| event.id).collect();
        assert_eq!(ids, [3, 4, 5]);
        assert_eq!(events[0].time, 1_000_000 + 30 * 5);
        let status = scanner.status();
        assert_eq!(status.last_event_id, 5);
        assert!(status.is_healthy);
    }

    #[tokio::test]
    async fn test_resumes_after_stored_max_and_survives_errors() {
        let store = Arc::new(MemoryLedger::new());
        let feed = Arc::new(FakeFeed::new(vec![
            vec![add_event(1), add_event(2)],
            vec![add_event(2), add_event(3)],
        ]));
        feed.fail_next.store(true, Ordering::SeqCst);

        let mut scanner = FeedScanner::new("BNB", feed.clone(), store.clone(), &config());
        scanner.start().await.unwrap();
        wait_for(&scanner.status, 3).await;
        scanner.stop().await.unwrap();
        assert_eq!(store.events().await.len(), 3);

        // a fresh scanner picks up after id 3
        let mut restarted = FeedScanner::new("BNB", feed, store.clone(), &config());
        restarted.start().await.unwrap();
        assert_eq!(restarted.status().last_event_id, 3);
        assert!(matches!(restarted.start().await, Err(ScannerError::AlreadyRunning)));
        restarted.stop().await.unwrap();
        assert!(matches!(restarted.stop().await, Err(ScannerError::NotRunning)));
    }

    fn pending_swap() -> RawEvent {
        let mut swap = RawEvent::new(
            "swap",
            [("pool", "BNB.BNB"), ("trade_slip", "1")]
                .into_iter()
                .collect::<Attributes>(),
        );
        swap.id = Some(1);
        swap.in_tx = Some(Tx {
            id: "T".to_owned(),
            coins: vec![Coin::new("BNB.BNB".parse().unwrap(), 100)],
            ..Default::default()
        });
        swap
    }

    #[tokio::test]
    async fn test_missing_settlements_are_looked_up() {
        let store = Arc::new(MemoryLedger::new());
        let mut feed = FakeFeed::new(vec![vec![pending_swap()]]);
        feed.settlements = vec![Tx {
            id: "OUT".to_owned(),
            coins: vec![Coin::new("THOR.RUNE".parse().unwrap(), 190)],
            ..Default::default()
        }];

        let mut scanner = FeedScanner::new("BNB", Arc::new(feed), store.clone(), &config());
        scanner.start().await.unwrap();
        wait_for(&scanner.status, 1).await;
        scanner.stop().await.unwrap();

        let events = store.events().await;
        assert_eq!(events[0].status, EventStatus::Success);
        assert_eq!(events[0].out_txs[0].id, "OUT");
        assert_eq!(store.changes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_settlement_lookup_still_stores_the_event() {
        let store = Arc::new(MemoryLedger::new());
        let mut feed = FakeFeed::new(vec![vec![pending_swap()]]);
        feed.settlements_fail = true;

        let mut scanner = FeedScanner::new("BNB", Arc::new(feed), store.clone(), &config());
        scanner.start().await.unwrap();
        wait_for(&scanner.status, 1).await;
        scanner.stop().await.unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Pending);
        assert!(events[0].out_txs.is_empty());
        assert!(scanner.status().is_healthy);
    }
}
