use super::aggregate::{self, Depths};
use super::{LedgerStore, StoreError};
use crate::entities::EventStatusName;
use crate::entities::events::{
    EventRecord, GetEventStatus, GetEventsByTxId, GetMaxEventId, GetMaxHeight, UpdateEvent,
    UpdateEventStatus,
};
use crate::entities::pool_changes::{
    GetOpeningDepth, GetPoolBasics, GetPoolChangesInRange, ListPools, PoolBasicsRecord,
    PoolChangeRecord,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use poolscan_sdk::objects::{
    Asset, Event, EventStatus, Fee, Interval, PoolAggChanges, PoolBasics, PoolChange,
    TotalVolChanges, Tx,
};
use sqlx::PgPool;

impl TryFrom<PoolChangeRecord> for PoolChange {
    type Error = StoreError;

    fn try_from(record: PoolChangeRecord) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, value: &str| StoreError::Corrupt(format!("{what} {value:?}"));
        Ok(PoolChange {
            time: record.time,
            height: record.height,
            event_id: record.event_id,
            event_type: record
                .event_type
                .parse()
                .map_err(|_| corrupt("event type", &record.event_type))?,
            pool: record
                .pool
                .parse()
                .map_err(|_| corrupt("pool", &record.pool))?,
            asset_amount: record.asset_amount,
            rune_amount: record.rune_amount,
            units: record.units,
            status: record
                .status
                .as_deref()
                .map(|status| status.parse().map_err(|_| corrupt("pool status", status)))
                .transpose()?,
            swap_direction: record
                .swap_direction
                .as_deref()
                .map(|direction| direction.parse().map_err(|_| corrupt("swap direction", direction)))
                .transpose()?,
            trade_slip: record.trade_slip,
            liquidity_fee: record.liquidity_fee,
        })
    }
}

fn into_basics(pool: &Asset, record: PoolBasicsRecord) -> Result<PoolBasics, StoreError> {
    let status = record
        .status
        .as_deref()
        .map(|status| {
            status
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("pool status {status:?}")))
        })
        .transpose()?;
    Ok(PoolBasics {
        pool: pool.clone(),
        asset_depth: record.asset_depth,
        rune_depth: record.rune_depth,
        units: record.units,
        asset_staked: record.asset_staked,
        rune_staked: record.rune_staked,
        asset_withdrawn: record.asset_withdrawn,
        rune_withdrawn: record.rune_withdrawn,
        buy_volume: record.buy_volume,
        sell_volume: record.sell_volume,
        buy_count: record.buy_count,
        sell_count: record.sell_count,
        rewards: record.rewards,
        gas_used: record.gas_used,
        gas_replenished: record.gas_replenished,
        status,
    })
}

fn into_changes(records: Vec<PoolChangeRecord>) -> Result<Vec<PoolChange>, StoreError> {
    records.into_iter().map(PoolChange::try_from).collect()
}

/// Ledger backed by the `events` and `pool_changes` tables.
pub struct PgLedger {
    db: DatabaseProcessor,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }

    /// Tells a missing event apart from a refused status change after an
    /// update touched no row.
    async fn explain_noop(&self, chain: &str, id: i64, to: EventStatus) -> StoreError {
        let current = self
            .db
            .process(GetEventStatus {
                chain: chain.to_owned(),
                id,
            })
            .await;
        match current {
            Ok(Some(from)) => StoreError::InvalidTransition {
                chain: chain.to_owned(),
                id,
                from: from.into(),
                to,
            },
            Ok(None) => StoreError::NotFound {
                chain: chain.to_owned(),
                id,
            },
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn append_event(&self, event: &Event, changes: &[PoolChange]) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;
        if !EventRecord::insert_tx(&mut tx, event).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        PoolChangeRecord::insert_many_tx(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn append_changes(&self, changes: &[PoolChange]) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        PoolChangeRecord::insert_many_tx(&mut tx, changes).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn max_event_id(&self, chain: &str) -> Result<i64, StoreError> {
        Ok(self
            .db
            .process(GetMaxEventId {
                chain: chain.to_owned(),
            })
            .await?)
    }

    async fn max_height(&self, chain: &str) -> Result<i64, StoreError> {
        Ok(self
            .db
            .process(GetMaxHeight {
                chain: chain.to_owned(),
            })
            .await?)
    }

    async fn events_by_tx_id(&self, tx_id: &str) -> Result<Vec<Event>, StoreError> {
        let records = self
            .db
            .process(GetEventsByTxId {
                tx_id: tx_id.to_owned(),
            })
            .await?;
        Ok(records.into_iter().map(Event::from).collect())
    }

    async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        let updated = self
            .db
            .process(UpdateEvent {
                chain: event.chain.to_string(),
                id: event.id,
                status: EventStatusName::from(event.status),
                fee: event.fee.clone(),
                out_txs: event.out_txs.clone(),
            })
            .await?;
        if updated == 0 {
            return Err(self.explain_noop(&event.chain, event.id, event.status).await);
        }
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
        let expected = i32::try_from(expected).unwrap_or(i32::MAX);
        let mut db_tx = self.db.begin().await?;
        let Some(record) = EventRecord::settle_tx(&mut db_tx, chain, id, tx, expected).await? else {
            db_tx.rollback().await?;
            return Ok(None);
        };
        PoolChangeRecord::insert_many_tx(&mut db_tx, changes).await?;
        db_tx.commit().await?;
        Ok(Some(record.into()))
    }

    async fn charge_fee(
        &self,
        chain: &str,
        id: i64,
        fee: &Fee,
        changes: &[PoolChange],
    ) -> Result<bool, StoreError> {
        let mut db_tx = self.db.begin().await?;
        if !EventRecord::charge_fee_tx(&mut db_tx, chain, id, fee).await? {
            db_tx.rollback().await?;
            return Ok(false);
        }
        PoolChangeRecord::insert_many_tx(&mut db_tx, changes).await?;
        db_tx.commit().await?;
        Ok(true)
    }

    async fn update_event_status(
        &self,
        chain: &str,
        id: i64,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        let updated = self
            .db
            .process(UpdateEventStatus {
                chain: chain.to_owned(),
                id,
                status: status.into(),
            })
            .await?;
        if updated == 0 {
            return Err(self.explain_noop(chain, id, status).await);
        }
        Ok(())
    }

    async fn delete_from_height(&self, height: i64) -> Result<u64, StoreError> {
        let mut tx = self.db.begin().await?;
        PoolChangeRecord::delete_from_height_tx(&mut tx, height).await?;
        let deleted = EventRecord::delete_from_height_tx(&mut tx, height).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn pools(&self) -> Result<Vec<Asset>, StoreError> {
        self.db
            .process(ListPools)
            .await?
            .into_iter()
            .map(|pool| {
                pool.parse()
                    .map_err(|_| StoreError::Corrupt(format!("pool {pool:?}")))
            })
            .collect()
    }

    async fn pool_basics(
        &self,
        pool: &Asset,
        at_height: Option<i64>,
    ) -> Result<PoolBasics, StoreError> {
        let record = self
            .db
            .process(GetPoolBasics {
                pool: pool.to_string(),
                at_height,
            })
            .await?;
        into_basics(pool, record)
    }

    async fn pool_agg_changes(
        &self,
        pool: &Asset,
        interval: Interval,
        from: i64,
        to: i64,
    ) -> Result<Vec<PoolAggChanges>, StoreError> {
        let start = aggregate::truncate(from, interval)?;
        // validate before touching the database
        aggregate::bucket_starts(interval, from, to)?;
        let opening = self
            .db
            .process(GetOpeningDepth {
                pool: pool.to_string(),
                before: start,
            })
            .await?;
        let records = self
            .db
            .process(GetPoolChangesInRange {
                pool: Some(pool.to_string()),
                from: start,
                to,
            })
            .await?;
        let opening = Depths {
            asset_depth: opening.asset_depth,
            rune_depth: opening.rune_depth,
            units: opening.units,
        };
        aggregate::pool_agg_changes(interval, from, to, opening, &into_changes(records)?)
    }

    async fn total_vol_changes(
        &self,
        interval: Interval,
        from: i64,
        to: i64,
    ) -> Result<Vec<TotalVolChanges>, StoreError> {
        let start = aggregate::truncate(from, interval)?;
        aggregate::bucket_starts(interval, from, to)?;
        let records = self
            .db
            .process(GetPoolChangesInRange {
                pool: None,
                from: start,
                to,
            })
            .await?;
        aggregate::total_vol_changes(interval, from, to, &into_changes(records)?)
    }
}
