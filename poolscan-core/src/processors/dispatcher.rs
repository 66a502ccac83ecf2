//! Dispatcher processor.
//!
//! The Dispatcher is responsible for:
//! - Buffering the raw events of one block and draining them in chain order
//!   (begin-block, per-tx, end-block) with outbound events moved last
//! - Decoding every raw event into the typed event model
//! - Assigning event ids (chain-assigned for feed events, sequential otherwise)
//! - Writing new events and their pool deltas through the `LedgerStore`
//! - Correlating fee and outbound events with the events they settle
//!
//! Failures are isolated per event: they are logged and the next event is
//! processed.

use super::status::PipelineStatus;
use crate::events::{DecodeError, Decoded, EventFee, EventOutbound, RawEvent, decode};
use crate::ledger::deltas::{
    creation_changes, fee_changes, intermediate_input_changes, settlement_changes,
};
use crate::ledger::{LedgerStore, StoreError};
use async_trait::async_trait;
use compact_str::CompactString;
use poolscan_sdk::objects::{DomainEvent, Event, EventStatus, EventType, Tx, UnknownEventType};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    UnknownType(#[from] UnknownEventType),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no stored event for {kind} of tx {tx_id}")]
    CorrelationMiss { kind: EventType, tx_id: String },

    #[error("{count} swaps share tx {tx_id}, at most two hops are supported")]
    UnsupportedHops { tx_id: String, count: usize },
}

/// Receives the contents of each block from a [`super::BlockScanner`].
#[async_trait]
pub trait BlockHandler: Send {
    /// Events of one transaction, in order.
    async fn on_tx(&mut self, height: i64, events: Vec<RawEvent>);

    /// Called once per block after all of its transactions.
    async fn on_block(&mut self, height: i64, time: i64, begin: Vec<RawEvent>, end: Vec<RawEvent>);
}

#[derive(Debug, Default)]
struct PendingBlock {
    height: i64,
    time: i64,
    begin: Vec<RawEvent>,
    txs: Vec<RawEvent>,
    end: Vec<RawEvent>,
}

pub struct Dispatcher {
    chain: CompactString,
    store: Arc<dyn LedgerStore>,
    status: Arc<PipelineStatus>,
    next_id: i64,
    pending: PendingBlock,
}

impl Dispatcher {
    /// Resumes id assignment after the highest id already stored for `chain`.
    pub async fn new(
        chain: impl Into<CompactString>,
        store: Arc<dyn LedgerStore>,
        status: Arc<PipelineStatus>,
    ) -> Result<Self, StoreError> {
        let chain = chain.into();
        let last_id = store.max_event_id(&chain).await?;
        status.resume_from(last_id);
        Ok(Self {
            chain,
            store,
            status,
            next_id: last_id + 1,
            pending: PendingBlock::default(),
        })
    }

    /// Highest id handed out so far.
    pub fn last_id(&self) -> i64 {
        self.next_id - 1
    }

    /// Drains the buffered block: begin events, tx events, end events, with
    /// every outbound moved behind the rest.
    pub async fn process_block(&mut self) {
        let block = std::mem::take(&mut self.pending);
        let mut events: Vec<RawEvent> = block
            .begin
            .into_iter()
            .chain(block.txs)
            .chain(block.end)
            .collect();
        events.sort_by_key(RawEvent::is_outbound);
        debug!(
            chain = %self.chain,
            height = block.height,
            events = events.len(),
            "Processing block"
        );
        for mut raw in events {
            raw.height = block.height;
            self.handle(raw, block.time).await;
        }
    }

    /// Dispatches one event, logging instead of returning failures.
    pub async fn handle(&mut self, raw: RawEvent, time: i64) {
        let kind = raw.kind.clone();
        let height = raw.height;
        match self.dispatch(raw, time).await {
            Ok(()) => {}
            Err(DispatchError::Store(e)) => {
                error!(chain = %self.chain, height, kind = %kind, error = %e, "Failed to persist event");
            }
            Err(DispatchError::UnknownType(e)) => {
                warn!(chain = %self.chain, height, error = %e, "Skipping unknown event type");
            }
            Err(e) => {
                warn!(chain = %self.chain, height, kind = %kind, error = %e, "Skipping event");
            }
        }
    }

    pub async fn dispatch(&mut self, raw: RawEvent, time: i64) -> Result<(), DispatchError> {
        let event_type: EventType = raw.kind.parse()?;
        let decoded = decode(event_type, &raw)?;
        let id = self.assign_id(raw.id);
        match decoded {
            Decoded::Domain { payload, in_tx } => {
                self.store_event(id, raw, time, payload, in_tx).await?
            }
            Decoded::Fee(fee) => self.correlate_fee(fee, time, raw.height).await?,
            Decoded::Outbound(outbound) => {
                self.correlate_outbound(outbound, time, raw.height).await?
            }
        }
        self.status.record(id);
        Ok(())
    }

    fn assign_id(&mut self, chain_id: Option<i64>) -> i64 {
        match chain_id {
            Some(id) => {
                self.next_id = self.next_id.max(id + 1);
                id
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        }
    }

    async fn store_event(
        &self,
        id: i64,
        raw: RawEvent,
        time: i64,
        payload: DomainEvent,
        in_tx: Tx,
    ) -> Result<(), DispatchError> {
        let mut event = Event {
            id,
            chain: self.chain.clone(),
            height: raw.height,
            time,
            status: EventStatus::Pending,
            in_tx,
            out_txs: raw.out_txs,
            fee: raw.fee.unwrap_or_default(),
            payload,
        };
        let settled = !event.event_type().awaits_settlement() || event.is_settled();
        if settled || raw.status == Some(EventStatus::Success) {
            event.status = EventStatus::Success;
        }
        let changes = creation_changes(&event);
        if self.store.append_event(&event, &changes).await? {
            debug!(chain = %self.chain, event_id = id, kind = %event.event_type(), "Stored event");
        } else {
            debug!(chain = %self.chain, event_id = id, "Event already stored");
        }
        Ok(())
    }

    async fn correlate_fee(&self, fee: EventFee, time: i64, height: i64) -> Result<(), DispatchError> {
        let events = self.store.events_by_tx_id(&fee.tx_id).await?;
        let Some(first) = events.first() else {
            return Err(DispatchError::CorrelationMiss {
                kind: EventType::Fee,
                tx_id: fee.tx_id,
            });
        };
        // a double-hop swap pays the fee on its last leg
        let targets = if first.event_type() == EventType::Swap {
            &events[events.len() - 1..]
        } else {
            &events[..]
        };

        let mut charged = false;
        for target in targets {
            // the pool delta goes with the first event that takes the fee
            let changes = if charged {
                Vec::new()
            } else {
                fee_changes(target, &fee.fee, time, height)
            };
            charged |= self
                .store
                .charge_fee(&target.chain, target.id, &fee.fee, &changes)
                .await?;
        }
        if !charged {
            debug!(chain = %self.chain, tx_id = %fee.tx_id, "Fee already attached");
        }
        Ok(())
    }

    async fn correlate_outbound(
        &self,
        outbound: EventOutbound,
        time: i64,
        height: i64,
    ) -> Result<(), DispatchError> {
        let candidates: Vec<Event> = self
            .store
            .events_by_tx_id(&outbound.in_tx_id)
            .await?
            .into_iter()
            .filter(|event| event.event_type().awaits_settlement())
            .collect();

        let index = match candidates.as_slice() {
            [] => {
                return Err(DispatchError::CorrelationMiss {
                    kind: EventType::Outbound,
                    tx_id: outbound.in_tx_id,
                });
            }
            [_] => 0,
            [first, second]
                if first.event_type() == EventType::Swap
                    && second.event_type() == EventType::Swap =>
            {
                // the blank-id leg settles the first hop
                if outbound.tx.is_blank() { 0 } else { 1 }
            }
            [_, _] => candidates
                .iter()
                .position(|event| !event.is_settled())
                .unwrap_or(0),
            _ => {
                return Err(DispatchError::UnsupportedHops {
                    tx_id: outbound.in_tx_id,
                    count: candidates.len(),
                });
            }
        };

        let target = &candidates[index];
        let mut changes = settlement_changes(target, &outbound.tx, time, height);
        if outbound.tx.is_blank() && candidates.len() == 2 && index == 0 {
            changes.extend(intermediate_input_changes(&candidates[1], &outbound.tx, time, height));
        }
        let settled = self
            .store
            .settle_event(
                &target.chain,
                target.id,
                &outbound.tx,
                target.expected_settlements(),
                &changes,
            )
            .await?;
        match settled {
            Some(event) => debug!(
                chain = %self.chain,
                event_id = event.id,
                status = %event.status,
                "Settled outbound"
            ),
            None => debug!(chain = %self.chain, tx_id = %outbound.in_tx_id, "Outbound already attached"),
        }
        Ok(())
    }
}

#[async_trait]
impl BlockHandler for Dispatcher {
    async fn on_tx(&mut self, height: i64, events: Vec<RawEvent>) {
        self.pending.height = height;
        self.pending.txs.extend(events);
    }

    async fn on_block(&mut self, height: i64, time: i64, begin: Vec<RawEvent>, end: Vec<RawEvent>) {
        self.pending.height = height;
        self.pending.time = time;
        self.pending.begin = begin;
        self.pending.end = end;
        self.process_block().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Attributes;
    use crate::ledger::MemoryLedger;
    use poolscan_sdk::objects::{
        Asset, BLANK_TX_ID, Fee, Interval, PoolAggChanges, PoolBasics, PoolChange,
        TotalVolChanges,
    };
    use std::time::Duration;

    fn raw(kind: &str, pairs: &[(&str, &str)]) -> RawEvent {
        RawEvent::new(kind, pairs.iter().copied().collect::<Attributes>())
    }

    fn swap(tx_id: &str, pool: &str, coin: &str) -> RawEvent {
        raw(
            "swap",
            &[
                ("pool", pool),
                ("trade_slip", "10"),
                ("liquidity_fee", "1"),
                ("id", tx_id),
                ("chain", "BNB"),
                ("from", "bnb1from"),
                ("to", "bnb1vault"),
                ("coin", coin),
            ],
        )
    }

    async fn dispatcher(store: &Arc<MemoryLedger>) -> Dispatcher {
        let store: Arc<dyn LedgerStore> = store.clone();
        Dispatcher::new("BNB", store, Arc::new(PipelineStatus::new("BNB")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_swap_fee_outbound_round_trip() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;

        dispatcher.on_tx(1, vec![swap("T", "BNB.BNB", "100 BNB.BNB")]).await;
        dispatcher.on_block(1, 1000, vec![], vec![]).await;
        dispatcher
            .on_tx(
                2,
                vec![
                    raw(
                        "outbound",
                        &[("in_tx_id", "T"), ("id", "OUT"), ("coin", "190 THOR.RUNE")],
                    ),
                    raw(
                        "fee",
                        &[("tx_id", "T"), ("coins", "2 BNB.BNB"), ("pool_deduct", "3")],
                    ),
                ],
            )
            .await;
        dispatcher.on_block(2, 1005, vec![], vec![]).await;

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        let swap = &events[0];
        assert_eq!(swap.status, EventStatus::Success);
        assert_eq!(swap.out_txs.len(), 1);
        assert_eq!(swap.fee.pool_deduct, 3);

        let pool: Asset = "BNB.BNB".parse().unwrap();
        let basics = store.pool_basics(&pool, None).await.unwrap();
        assert_eq!(basics.asset_depth, 100 + 2);
        assert_eq!(basics.rune_depth, -190 - 3);
        assert_eq!(basics.sell_volume, 190);
        assert_eq!(basics.sell_count, 1);
    }

    #[tokio::test]
    async fn test_double_hop_outbounds() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;

        dispatcher
            .on_tx(
                1,
                vec![
                    swap("T", "BNB.BNB", "100 BNB.BNB"),
                    swap("T", "BTC.BTC", "100 BNB.BNB"),
                ],
            )
            .await;
        dispatcher.on_block(1, 1000, vec![], vec![]).await;
        dispatcher
            .on_tx(
                2,
                vec![
                    raw(
                        "outbound",
                        &[("in_tx_id", "T"), ("id", "BTCOUT"), ("coin", "7 BTC.BTC")],
                    ),
                    raw(
                        "outbound",
                        &[("in_tx_id", "T"), ("id", BLANK_TX_ID), ("coin", "190 THOR.RUNE")],
                    ),
                ],
            )
            .await;
        dispatcher.on_block(2, 1005, vec![], vec![]).await;

        let events = store.events().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].out_txs[0].is_blank());
        assert_eq!(events[1].out_txs[0].id, "BTCOUT");
        assert!(events.iter().all(|event| event.status == EventStatus::Success));

        let btc: Asset = "BTC.BTC".parse().unwrap();
        let basics = store.pool_basics(&btc, None).await.unwrap();
        assert_eq!(basics.rune_depth, 190);
        assert_eq!(basics.asset_depth, -7);
        assert_eq!(basics.buy_volume, 190);
    }

    #[tokio::test]
    async fn test_unknown_type_does_not_stop_the_block() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;
        dispatcher
            .on_tx(
                1,
                vec![
                    raw("foobar", &[("pool", "BNB.BNB")]),
                    raw("add", &[("pool", "BNB.BNB"), ("id", "A"), ("coin", "5 BNB.BNB")]),
                ],
            )
            .await;
        dispatcher.on_block(1, 1000, vec![], vec![]).await;
        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), EventType::Add);
    }

    #[tokio::test]
    async fn test_outbound_is_processed_after_its_swap() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;
        dispatcher
            .on_block(
                1,
                1000,
                vec![raw(
                    "outbound",
                    &[("in_tx_id", "T"), ("id", "OUT"), ("coin", "190 THOR.RUNE")],
                )],
                vec![swap("T", "BNB.BNB", "100 BNB.BNB")],
            )
            .await;
        let events = store.events().await;
        assert_eq!(events[0].status, EventStatus::Success);
        assert_eq!(events[0].out_txs.len(), 1);
    }

    #[tokio::test]
    async fn test_unstake_settles_after_two_legs() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;
        let unstake = raw(
            "unstake",
            &[("pool", "BNB.BNB"), ("stake_units", "10"), ("id", "U"), ("coin", "1 BNB.BNB")],
        );
        let leg = |coin: &str, id: &str| {
            raw("outbound", &[("in_tx_id", "U"), ("id", id), ("coin", coin)])
        };
        dispatcher.dispatch(unstake, 1000).await.unwrap();
        dispatcher.dispatch(leg("40 BNB.BNB", "O1"), 1005).await.unwrap();
        assert_eq!(store.events().await[0].status, EventStatus::Pending);
        // redelivery is ignored
        dispatcher.dispatch(leg("40 BNB.BNB", "O1"), 1005).await.unwrap();
        assert_eq!(store.events().await[0].out_txs.len(), 1);
        dispatcher.dispatch(leg("80 THOR.RUNE", "O2"), 1005).await.unwrap();
        assert_eq!(store.events().await[0].status, EventStatus::Success);
    }

    #[tokio::test]
    async fn test_three_hops_are_unsupported() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;
        for pool in ["BNB.BNB", "BTC.BTC", "ETH.ETH"] {
            dispatcher.dispatch(swap("T", pool, "1 BNB.BNB"), 1000).await.unwrap();
        }
        let result = dispatcher
            .dispatch(raw("outbound", &[("in_tx_id", "T"), ("id", "O")]), 1005)
            .await;
        assert!(matches!(result, Err(DispatchError::UnsupportedHops { count: 3, .. })));

        let miss = dispatcher
            .dispatch(raw("fee", &[("tx_id", "NOPE"), ("coins", "")]), 1005)
            .await;
        assert!(matches!(miss, Err(DispatchError::CorrelationMiss { .. })));
    }

    #[tokio::test]
    async fn test_ids_resume_and_follow_the_feed() {
        let store = Arc::new(MemoryLedger::new());
        let mut first = dispatcher(&store).await;
        first
            .dispatch(raw("add", &[("pool", "BNB.BNB")]), 1000)
            .await
            .unwrap();
        assert_eq!(first.last_id(), 1);

        let mut resumed = dispatcher(&store).await;
        assert_eq!(resumed.last_id(), 1);
        let mut feed_event = raw("add", &[("pool", "BNB.BNB")]);
        feed_event.id = Some(40);
        resumed.dispatch(feed_event, 1000).await.unwrap();
        resumed
            .dispatch(raw("add", &[("pool", "BNB.BNB")]), 1000)
            .await
            .unwrap();
        let ids: Vec<_> = store.events().await.iter().map(|event| event.id).collect();
        assert_eq!(ids, [1, 40, 41]);
    }

    #[tokio::test]
    async fn test_refund_settles_after_one_leg_per_coin() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;
        let refund = raw(
            "refund",
            &[
                ("code", "105"),
                ("reason", "memo"),
                ("id", "R"),
                ("coins", "1 BNB.BNB, 2 THOR.RUNE"),
            ],
        );
        let leg = |coin: &str, id: &str| {
            raw("outbound", &[("in_tx_id", "R"), ("id", id), ("coin", coin)])
        };
        dispatcher.dispatch(refund, 1000).await.unwrap();
        dispatcher.dispatch(leg("1 BNB.BNB", "O1"), 1005).await.unwrap();
        assert_eq!(store.events().await[0].status, EventStatus::Pending);
        dispatcher.dispatch(leg("2 THOR.RUNE", "O2"), 1005).await.unwrap();
        let events = store.events().await;
        assert_eq!(events[0].status, EventStatus::Success);
        assert_eq!(events[0].out_txs.len(), 2);
    }

    #[tokio::test]
    async fn test_fee_is_attached_to_every_non_swap_match() {
        let store = Arc::new(MemoryLedger::new());
        let mut dispatcher = dispatcher(&store).await;
        for _ in 0..2 {
            let add = raw("add", &[("pool", "BNB.BNB"), ("id", "A"), ("coin", "5 BNB.BNB")]);
            dispatcher.dispatch(add, 1000).await.unwrap();
        }
        let fee = raw("fee", &[("tx_id", "A"), ("coins", "2 BNB.BNB"), ("pool_deduct", "3")]);
        dispatcher.dispatch(fee.clone(), 1005).await.unwrap();
        // redelivery is ignored
        dispatcher.dispatch(fee, 1005).await.unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.fee.pool_deduct == 3));
        let pool: Asset = "BNB.BNB".parse().unwrap();
        let basics = store.pool_basics(&pool, None).await.unwrap();
        assert_eq!(basics.asset_depth, 5 + 5 + 2);
        assert_eq!(basics.rune_depth, -3);
    }

    /// Delays tx lookups so that concurrent correlations read the same state.
    struct SlowLookup(Arc<MemoryLedger>);

    #[async_trait]
    impl LedgerStore for SlowLookup {
        async fn append_event(&self, event: &Event, changes: &[PoolChange]) -> Result<bool, StoreError> {
            self.0.append_event(event, changes).await
        }

        async fn append_changes(&self, changes: &[PoolChange]) -> Result<(), StoreError> {
            self.0.append_changes(changes).await
        }

        async fn max_event_id(&self, chain: &str) -> Result<i64, StoreError> {
            self.0.max_event_id(chain).await
        }

        async fn max_height(&self, chain: &str) -> Result<i64, StoreError> {
            self.0.max_height(chain).await
        }

        async fn events_by_tx_id(&self, tx_id: &str) -> Result<Vec<Event>, StoreError> {
            let events = self.0.events_by_tx_id(tx_id).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            events
        }

        async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
            self.0.update_event(event).await
        }

        async fn settle_event(
            &self,
            chain: &str,
            id: i64,
            tx: &Tx,
            expected: usize,
            changes: &[PoolChange],
        ) -> Result<Option<Event>, StoreError> {
            self.0.settle_event(chain, id, tx, expected, changes).await
        }

        async fn charge_fee(
            &self,
            chain: &str,
            id: i64,
            fee: &Fee,
            changes: &[PoolChange],
        ) -> Result<bool, StoreError> {
            self.0.charge_fee(chain, id, fee, changes).await
        }

        async fn update_event_status(
            &self,
            chain: &str,
            id: i64,
            status: EventStatus,
        ) -> Result<(), StoreError> {
            self.0.update_event_status(chain, id, status).await
        }

        async fn delete_from_height(&self, height: i64) -> Result<u64, StoreError> {
            self.0.delete_from_height(height).await
        }

        async fn pools(&self) -> Result<Vec<Asset>, StoreError> {
            self.0.pools().await
        }

        async fn pool_basics(
            &self,
            pool: &Asset,
            at_height: Option<i64>,
        ) -> Result<PoolBasics, StoreError> {
            self.0.pool_basics(pool, at_height).await
        }

        async fn pool_agg_changes(
            &self,
            pool: &Asset,
            interval: Interval,
            from: i64,
            to: i64,
        ) -> Result<Vec<PoolAggChanges>, StoreError> {
            self.0.pool_agg_changes(pool, interval, from, to).await
        }

        async fn total_vol_changes(
            &self,
            interval: Interval,
            from: i64,
            to: i64,
        ) -> Result<Vec<TotalVolChanges>, StoreError> {
            self.0.total_vol_changes(interval, from, to).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_legs_from_two_chains_both_land() {
        let ledger = Arc::new(MemoryLedger::new());
        let store: Arc<dyn LedgerStore> = Arc::new(SlowLookup(ledger.clone()));
        let mut bnb = Dispatcher::new("BNB", store.clone(), Arc::new(PipelineStatus::new("BNB")))
            .await
            .unwrap();
        let mut thor = Dispatcher::new("THOR", store, Arc::new(PipelineStatus::new("THOR")))
            .await
            .unwrap();
        let unstake = raw(
            "unstake",
            &[("pool", "BNB.BNB"), ("stake_units", "10"), ("id", "U"), ("coin", "1 BNB.BNB")],
        );
        bnb.dispatch(unstake, 1000).await.unwrap();

        let leg = |coin: &str, id: &str| {
            raw("outbound", &[("in_tx_id", "U"), ("id", id), ("coin", coin)])
        };
        let (first, second) = tokio::join!(
            bnb.dispatch(leg("40 BNB.BNB", "O1"), 1005),
            thor.dispatch(leg("80 THOR.RUNE", "O2"), 1005),
        );
        first.unwrap();
        second.unwrap();

        let events = ledger.events().await;
        assert_eq!(events[0].out_txs.len(), 2);
        assert_eq!(events[0].status, EventStatus::Success);
        let pool: Asset = "BNB.BNB".parse().unwrap();
        let basics = ledger.pool_basics(&pool, None).await.unwrap();
        assert_eq!(basics.asset_withdrawn, 40);
        assert_eq!(basics.rune_withdrawn, 80);
    }
}
