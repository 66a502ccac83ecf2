pub mod asset;
pub mod event;
pub mod ledger;
pub mod status;
pub mod tx;

pub use asset::{Asset, AssetParseError, Coin, NATIVE_CHAIN, PoolAmount, RUNE_TICKER};
pub use event::{
    DomainEvent, ErrataPool, Event, EventAdd, EventErrata, EventGas, EventPool, EventRefund,
    EventReward, EventSlash, EventStake, EventStatus, EventSwap, EventType, EventUnstake, GasPool,
    PoolStatus, UnknownEventType,
};
pub use ledger::{Interval, PoolAggChanges, PoolBasics, PoolChange, SwapDirection, TotalVolChanges};
pub use status::ChainStatus;
pub use tx::{BLANK_TX_ID, Fee, Tx};
