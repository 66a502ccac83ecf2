//! The pool-state ledger: stored events plus the append-only pool deltas
//! derived from them.
//!
//! Every pipeline writes through [`LedgerStore`]; the in-memory and Postgres
//! implementations share the delta derivation in [`deltas`] and the bucket
//! arithmetic in [`aggregate`].

pub mod aggregate;
pub mod deltas;
pub mod memory;
pub mod pg;

pub use memory::MemoryLedger;
pub use pg::PgLedger;

use async_trait::async_trait;
use poolscan_sdk::objects::{
    Asset, Event, EventStatus, Fee, Interval, PoolAggChanges, PoolBasics, PoolChange,
    TotalVolChanges, Tx,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("event {chain}/{id} not found")]
    NotFound { chain: String, id: i64 },

    #[error("event {chain}/{id} cannot move from {from} to {to}")]
    InvalidTransition {
        chain: String,
        id: i64,
        from: EventStatus,
        to: EventStatus,
    },

    #[error("invalid time range: {from} .. {to}")]
    InvalidRange { from: i64, to: i64 },

    #[error("time out of range: {0}")]
    TimeRange(#[from] time::error::ComponentRange),

    #[error("range needs {0} buckets, more than allowed")]
    RangeTooLarge(usize),
}

/// Persistence port of the pipeline.
///
/// Implementations must tolerate concurrent appends from independent chain
/// pipelines.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Stores `event` with its deltas in one unit. Returns `false` without
    /// writing anything when `(chain, id)` is already stored.
    async fn append_event(&self, event: &Event, changes: &[PoolChange]) -> Result<bool, StoreError>;

    async fn append_changes(&self, changes: &[PoolChange]) -> Result<(), StoreError>;

    /// Highest stored event id of `chain`, 0 when there is none.
    async fn max_event_id(&self, chain: &str) -> Result<i64, StoreError>;

    /// Highest height of any stored event of `chain`, 0 when there is none.
    async fn max_height(&self, chain: &str) -> Result<i64, StoreError>;

    /// Events whose inbound tx is `tx_id`, ascending by id.
    async fn events_by_tx_id(&self, tx_id: &str) -> Result<Vec<Event>, StoreError>;

    /// Overwrites status, fee and out txs of a stored event.
    async fn update_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Appends `tx` to the out txs of a stored event and `changes` to the
    /// ledger in one unit. The event becomes `Success` once it carries
    /// `expected` out txs. Returns `None`, writing nothing, when the event
    /// already carries `tx` or does not exist.
    async fn settle_event(
        &self,
        chain: &str,
        id: i64,
        tx: &Tx,
        expected: usize,
        changes: &[PoolChange],
    ) -> Result<Option<Event>, StoreError>;

    /// Sets the fee of a stored event and appends `changes` in one unit.
    /// Returns `false`, writing nothing, when the event already carries `fee`
    /// or does not exist.
    async fn charge_fee(
        &self,
        chain: &str,
        id: i64,
        fee: &Fee,
        changes: &[PoolChange],
    ) -> Result<bool, StoreError>;

    /// Refuses `Success -> Pending`.
    async fn update_event_status(
        &self,
        chain: &str,
        id: i64,
        status: EventStatus,
    ) -> Result<(), StoreError>;

    /// Removes events and deltas at or above `height`. Returns the number of
    /// events removed.
    async fn delete_from_height(&self, height: i64) -> Result<u64, StoreError>;

    async fn pools(&self) -> Result<Vec<Asset>, StoreError>;

    /// Summary of `pool` over every delta up to `at_height` (all when `None`).
    async fn pool_basics(&self, pool: &Asset, at_height: Option<i64>)
    -> Result<PoolBasics, StoreError>;

    async fn pool_agg_changes(
        &self,
        pool: &Asset,
        interval: Interval,
        from: i64,
        to: i64,
    ) -> Result<Vec<PoolAggChanges>, StoreError>;

    async fn total_vol_changes(
        &self,
        interval: Interval,
        from: i64,
        to: i64,
    ) -> Result<Vec<TotalVolChanges>, StoreError>;
}
