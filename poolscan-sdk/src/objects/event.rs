//! Canonical event records and their typed payloads.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::asset::{Asset, PoolAmount};
use super::tx::{Fee, Tx};

/// Every event type the node emits that the ledger understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Stake,
    Swap,
    Unstake,
    Reward,
    Refund,
    Add,
    Pool,
    Gas,
    Slash,
    Errata,
    Fee,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0:?}")]
pub struct UnknownEventType(pub String);

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::Stake,
        EventType::Swap,
        EventType::Unstake,
        EventType::Reward,
        EventType::Refund,
        EventType::Add,
        EventType::Pool,
        EventType::Gas,
        EventType::Slash,
        EventType::Errata,
        EventType::Fee,
        EventType::Outbound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Stake => "stake",
            EventType::Swap => "swap",
            EventType::Unstake => "unstake",
            EventType::Reward => "reward",
            EventType::Refund => "refund",
            EventType::Add => "add",
            EventType::Pool => "pool",
            EventType::Gas => "gas",
            EventType::Slash => "slash",
            EventType::Errata => "errata",
            EventType::Fee => "fee",
            EventType::Outbound => "outbound",
        }
    }

    /// Correlation events mutate a stored event instead of creating one.
    pub fn is_correlation(&self) -> bool {
        matches!(self, EventType::Fee | EventType::Outbound)
    }

    /// Event types whose outbound legs arrive later as separate events.
    pub fn awaits_settlement(&self) -> bool {
        matches!(self, EventType::Swap | EventType::Unstake | EventType::Refund)
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // block results name the reward event "rewards"
        match s {
            "rewards" => Ok(EventType::Reward),
            other => EventType::ALL
                .into_iter()
                .find(|t| t.as_str() == other)
                .ok_or_else(|| UnknownEventType(other.to_owned())),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of an event. Only ever moves `Pending -> Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Pending,
    Success,
}

impl EventStatus {
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        !(*self == EventStatus::Success && next == EventStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "Pending",
            EventStatus::Success => "Success",
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pending") {
            Ok(EventStatus::Pending)
        } else if s.eq_ignore_ascii_case("success") {
            Ok(EventStatus::Success)
        } else {
            Err(format!("invalid event status: {s:?}"))
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational status of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolStatus {
    Enabled,
    Bootstrap,
    Suspended,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Enabled => "Enabled",
            PoolStatus::Bootstrap => "Bootstrap",
            PoolStatus::Suspended => "Suspended",
        }
    }
}

impl FromStr for PoolStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [PoolStatus::Enabled, PoolStatus::Bootstrap, PoolStatus::Suspended]
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("invalid pool status: {s:?}"))
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStake {
    pub pool: Asset,
    pub stake_units: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSwap {
    pub pool: Asset,
    pub price_target: i64,
    pub trade_slip: i64,
    pub liquidity_fee: i64,
    pub liquidity_fee_in_rune: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUnstake {
    pub pool: Asset,
    pub stake_units: i64,
    #[serde(default)]
    pub basis_points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReward {
    #[serde(default)]
    pub bond_reward: i64,
    pub pool_rewards: Vec<PoolAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRefund {
    pub code: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAdd {
    pub pool: Asset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPool {
    pub pool: Asset,
    pub status: PoolStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPool {
    pub asset: Asset,
    pub asset_amt: i64,
    pub rune_amt: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGas {
    pub pools: Vec<GasPool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSlash {
    pub pool: Asset,
    pub slash_amount: Vec<PoolAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrataPool {
    pub asset: Asset,
    pub rune_amt: i64,
    pub rune_add: bool,
    pub asset_amt: i64,
    pub asset_add: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventErrata {
    pub pools: Vec<ErrataPool>,
}

/// The payload of a stored (non-correlation) event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "lowercase")]
pub enum DomainEvent {
    Stake(EventStake),
    Swap(EventSwap),
    Unstake(EventUnstake),
    Reward(EventReward),
    Refund(EventRefund),
    Add(EventAdd),
    Pool(EventPool),
    Gas(EventGas),
    Slash(EventSlash),
    Errata(EventErrata),
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::Stake(_) => EventType::Stake,
            DomainEvent::Swap(_) => EventType::Swap,
            DomainEvent::Unstake(_) => EventType::Unstake,
            DomainEvent::Reward(_) => EventType::Reward,
            DomainEvent::Refund(_) => EventType::Refund,
            DomainEvent::Add(_) => EventType::Add,
            DomainEvent::Pool(_) => EventType::Pool,
            DomainEvent::Gas(_) => EventType::Gas,
            DomainEvent::Slash(_) => EventType::Slash,
            DomainEvent::Errata(_) => EventType::Errata,
        }
    }

    /// The single pool this event is about, when there is one.
    pub fn pool(&self) -> Option<&Asset> {
        match self {
            DomainEvent::Stake(e) => Some(&e.pool),
            DomainEvent::Swap(e) => Some(&e.pool),
            DomainEvent::Unstake(e) => Some(&e.pool),
            DomainEvent::Add(e) => Some(&e.pool),
            DomainEvent::Pool(e) => Some(&e.pool),
            DomainEvent::Slash(e) => Some(&e.pool),
            DomainEvent::Reward(_)
            | DomainEvent::Refund(_)
            | DomainEvent::Gas(_)
            | DomainEvent::Errata(_) => None,
        }
    }
}

/// A canonical event record as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub chain: CompactString,
    pub height: i64,
    /// Block time, unix seconds.
    pub time: i64,
    pub status: EventStatus,
    pub in_tx: Tx,
    #[serde(default)]
    pub out_txs: Vec<Tx>,
    #[serde(default)]
    pub fee: Fee,
    pub payload: DomainEvent,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Number of outbound legs after which the event counts as settled.
    ///
    /// A swap pays out once, an unstake pays out both sides of the pool and
    /// a refund returns every inbound coin separately.
    pub fn expected_settlements(&self) -> usize {
        match self.payload {
            DomainEvent::Unstake(_) => 2,
            DomainEvent::Refund(_) => self.in_tx.coins.len().max(1),
            _ => 1,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.out_txs.len() >= self.expected_settlements()
    }
}
