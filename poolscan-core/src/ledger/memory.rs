use super::aggregate::{self, Depths};
use super::{LedgerStore, StoreError};
use async_trait::async_trait;
use itertools::Itertools;
use poolscan_sdk::objects::{
    Asset, Event, EventStatus, Fee, Interval, PoolAggChanges, PoolBasics, PoolChange,
    TotalVolChanges, Tx,
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    changes: Vec<PoolChange>,
}

impl State {
    fn find_mut(&mut self, chain: &str, id: i64) -> Result<&mut Event, StoreError> {
        self.events
            .iter_mut()
            .find(|event| event.chain == chain && event.id == id)
            .ok_or_else(|| StoreError::NotFound {
                chain: chain.to_owned(),
                id,
            })
    }
}

/// Ledger kept entirely in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, in insertion order.
    pub async fn events(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Every stored delta, in insertion order.
    pub async fn changes(&self) -> Vec<PoolChange> {
        self.state.read().await.changes.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn append_event(&self, event: &Event, changes: &[PoolChange]) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state
            .events
            .iter()
            .any(|stored| stored.chain == event.chain && stored.id == event.id)
        {
            return Ok(false);
        }
        state.events.push(event.clone());
        state.changes.extend_from_slice(changes);
        Ok(true)
    }

    async fn append_changes(&self, changes: &[PoolChange]) -> Result<(), StoreError> {
        self.state.write().await.changes.extend_from_slice(changes);
        Ok(())
    }

    async fn max_event_id(&self, chain: &str) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.chain == chain)
            .map(|event| event.id)
            .max()
            .unwrap_or(0))
    }

    async fn max_height(&self, chain: &str) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.chain == chain)
            .map(|event| event.height)
            .max()
            .unwrap_or(0))
    }

    async fn events_by_tx_id(&self, tx_id: &str) -> Result<Vec<Event>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.in_tx.id == tx_id)
            .sorted_by_key(|event| event.id)
            .cloned()
            .collect())
    }

    async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state.find_mut(&event.chain, event.id)?;
        if !stored.status.can_transition_to(event.status) {
            return Err(StoreError::InvalidTransition {
                chain: event.chain.to_string(),
                id: event.id,
                from: stored.status,
                to: event.status,
            });
        }
        stored.status = event.status;
        stored.fee = event.fee.clone();
        stored.out_txs = event.out_txs.clone();
        Ok(())
    }

    async fn settle_event(
        &self,
        chain: &str,
        id: i64,
        tx: &Tx,
        expected: usize,
        changes: &[PoolChange],
    ) -> Result<Option<Event>, StoreError> {
        let mut state = self.state.write().await;
        let Ok(stored) = state.find_mut(chain, id) else {
            return Ok(None);
        };
        if stored.out_txs.contains(tx) {
            return Ok(None);
        }
        stored.out_txs.push(tx.clone());
        if stored.out_txs.len() >= expected {
            stored.status = EventStatus::Success;
        }
        let settled = stored.clone();
        state.changes.extend_from_slice(changes);
        Ok(Some(settled))
    }

    async fn charge_fee(
        &self,
        chain: &str,
        id: i64,
        fee: &Fee,
        changes: &[PoolChange],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Ok(stored) = state.find_mut(chain, id) else {
            return Ok(false);
        };
        if stored.fee == *fee {
            return Ok(false);
        }
        stored.fee = fee.clone();
        state.changes.extend_from_slice(changes);
        Ok(true)
    }

    async fn update_event_status(
        &self,
        chain: &str,
        id: i64,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state.find_mut(chain, id)?;
        if !stored.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                chain: chain.to_owned(),
                id,
                from: stored.status,
                to: status,
            });
        }
        stored.status = status;
        Ok(())
    }

    async fn delete_from_height(&self, height: i64) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.events.len();
        state.events.retain(|event| event.height < height);
        state.changes.retain(|change| change.height < height);
        Ok((before - state.events.len()) as u64)
    }

    async fn pools(&self) -> Result<Vec<Asset>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .changes
            .iter()
            .map(|change| change.pool.clone())
            .sorted()
            .dedup()
            .collect())
    }

    async fn pool_basics(
        &self,
        pool: &Asset,
        at_height: Option<i64>,
    ) -> Result<PoolBasics, StoreError> {
        let state = self.state.read().await;
        let changes = state.changes.iter().filter(|change| {
            change.pool == *pool && at_height.is_none_or(|height| change.height <= height)
        });
        Ok(aggregate::pool_basics(pool, changes))
    }

    async fn pool_agg_changes(
        &self,
        pool: &Asset,
        interval: Interval,
        from: i64,
        to: i64,
    ) -> Result<Vec<PoolAggChanges>, StoreError> {
        let start = aggregate::truncate(from, interval)?;
        let state = self.state.read().await;
        let (before, within): (Vec<_>, Vec<_>) = state
            .changes
            .iter()
            .filter(|change| change.pool == *pool && change.time < to)
            .partition(|change| change.time < start);
        aggregate::pool_agg_changes(interval, from, to, Depths::sum(before), within)
    }

    async fn total_vol_changes(
        &self,
        interval: Interval,
        from: i64,
        to: i64,
    ) -> Result<Vec<TotalVolChanges>, StoreError> {
        let start = aggregate::truncate(from, interval)?;
        let state = self.state.read().await;
        aggregate::total_vol_changes(
            interval,
            from,
            to,
            state
                .changes
                .iter()
                .filter(|change| change.time >= start && change.time < to),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolscan_sdk::objects::{DomainEvent, EventAdd, EventType, Fee, Tx};

    fn asset() -> Asset {
        "BNB.BNB".parse().unwrap()
    }

    fn event(id: i64, height: i64, tx_id: &str) -> Event {
        Event {
            id,
            chain: "BNB".into(),
            height,
            time: height * 5,
            status: EventStatus::Pending,
            in_tx: Tx {
                id: tx_id.to_owned(),
                ..Default::default()
            },
            out_txs: Vec::new(),
            fee: Fee::default(),
            payload: DomainEvent::Add(EventAdd { pool: asset() }),
        }
    }

    fn delta(height: i64, asset_amount: i64) -> PoolChange {
        let mut change = PoolChange::new(height * 5, height, 1, EventType::Add, asset());
        change.asset_amount = asset_amount;
        change
    }

    #[tokio::test]
    async fn test_depth_is_the_sum_of_deltas() {
        let ledger = MemoryLedger::new();
        ledger
            .append_changes(&[delta(1, 1000), delta(2, -45), delta(3, 5)])
            .await
            .unwrap();
        let basics = ledger.pool_basics(&asset(), None).await.unwrap();
        assert_eq!(basics.asset_depth, 960);
        let at_two = ledger.pool_basics(&asset(), Some(2)).await.unwrap();
        assert_eq!(at_two.asset_depth, 955);
    }

    #[tokio::test]
    async fn test_append_event_is_idempotent() {
        let ledger = MemoryLedger::new();
        assert!(ledger.append_event(&event(1, 1, "A"), &[delta(1, 10)]).await.unwrap());
        assert!(!ledger.append_event(&event(1, 1, "A"), &[delta(1, 10)]).await.unwrap());
        assert_eq!(ledger.changes().await.len(), 1);
        assert_eq!(ledger.max_event_id("BNB").await.unwrap(), 1);
        assert_eq!(ledger.max_event_id("BTC").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_by_tx_is_ordered() {
        let ledger = MemoryLedger::new();
        ledger.append_event(&event(7, 1, "T"), &[]).await.unwrap();
        ledger.append_event(&event(3, 1, "T"), &[]).await.unwrap();
        ledger.append_event(&event(5, 1, "U"), &[]).await.unwrap();
        let ids: Vec<_> = ledger
            .events_by_tx_id("T")
            .await
            .unwrap()
            .iter()
            .map(|event| event.id)
            .collect();
        assert_eq!(ids, [3, 7]);
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let ledger = MemoryLedger::new();
        ledger.append_event(&event(1, 1, "T"), &[]).await.unwrap();
        ledger
            .update_event_status("BNB", 1, EventStatus::Success)
            .await
            .unwrap();
        assert!(matches!(
            ledger.update_event_status("BNB", 1, EventStatus::Pending).await,
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.update_event_status("BNB", 2, EventStatus::Success).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_settle_and_charge_write_once() {
        let ledger = MemoryLedger::new();
        ledger.append_event(&event(1, 4, "U"), &[]).await.unwrap();
        assert_eq!(ledger.max_height("BNB").await.unwrap(), 4);
        let leg = |id: &str| Tx {
            id: id.to_owned(),
            ..Default::default()
        };

        let first = ledger
            .settle_event("BNB", 1, &leg("O1"), 2, &[delta(5, -1)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, EventStatus::Pending);
        assert!(ledger.settle_event("BNB", 1, &leg("O1"), 2, &[delta(5, -1)]).await.unwrap().is_none());
        let second = ledger
            .settle_event("BNB", 1, &leg("O2"), 2, &[delta(5, -2)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, EventStatus::Success);
        assert!(ledger.settle_event("BNB", 9, &leg("O3"), 1, &[]).await.unwrap().is_none());

        let fee = Fee {
            pool_deduct: 3,
            ..Default::default()
        };
        assert!(ledger.charge_fee("BNB", 1, &fee, &[delta(5, 2)]).await.unwrap());
        assert!(!ledger.charge_fee("BNB", 1, &fee, &[delta(5, 2)]).await.unwrap());
        assert_eq!(ledger.changes().await.len(), 3);
        assert_eq!(ledger.events().await[0].fee.pool_deduct, 3);
    }

    #[tokio::test]
    async fn test_delete_from_height() {
        let ledger = MemoryLedger::new();
        ledger.append_event(&event(1, 1, "A"), &[delta(1, 10)]).await.unwrap();
        ledger.append_event(&event(2, 5, "B"), &[delta(5, 20)]).await.unwrap();
        assert_eq!(ledger.delete_from_height(5).await.unwrap(), 1);
        assert_eq!(ledger.events().await.len(), 1);
        assert_eq!(ledger.pool_basics(&asset(), None).await.unwrap().asset_depth, 10);
        assert_eq!(ledger.pools().await.unwrap(), vec![asset()]);
    }

    #[tokio::test]
    async fn test_buckets_open_with_prior_depth() {
        let ledger = MemoryLedger::new();
        // times 5, 500 and 4000
        ledger
            .append_changes(&[delta(1, 100), delta(100, 10), delta(800, 1)])
            .await
            .unwrap();
        let buckets = ledger
            .pool_agg_changes(&asset(), Interval::Hour, 3600, 7200)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].asset_changes, 1);
        assert_eq!(buckets[0].asset_depth, 111);
    }
}
