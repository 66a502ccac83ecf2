//! Pool ledger rows and the aggregate shapes derived from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::asset::Asset;
use super::event::{EventType, PoolStatus};

/// Which side of the pool a swap paid into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    /// Rune in, asset out.
    Buy,
    /// Asset in, rune out.
    Sell,
}

impl SwapDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapDirection::Buy => "buy",
            SwapDirection::Sell => "sell",
        }
    }
}

impl FromStr for SwapDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(SwapDirection::Buy),
            "sell" => Ok(SwapDirection::Sell),
            other => Err(format!("invalid swap direction: {other:?}")),
        }
    }
}

/// An immutable delta against one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolChange {
    /// Block time, unix seconds.
    pub time: i64,
    pub height: i64,
    pub event_id: i64,
    pub event_type: EventType,
    pub pool: Asset,
    pub asset_amount: i64,
    pub rune_amount: i64,
    pub units: i64,
    pub status: Option<PoolStatus>,
    pub swap_direction: Option<SwapDirection>,
    pub trade_slip: Option<i64>,
    pub liquidity_fee: Option<i64>,
}

impl PoolChange {
    /// A zero delta for `pool`, to be filled in by the caller.
    pub fn new(time: i64, height: i64, event_id: i64, event_type: EventType, pool: Asset) -> Self {
        Self {
            time,
            height,
            event_id,
            event_type,
            pool,
            asset_amount: 0,
            rune_amount: 0,
            units: 0,
            status: None,
            swap_direction: None,
            trade_slip: None,
            liquidity_fee: None,
        }
    }

    /// Rune-denominated swap volume carried by this row.
    ///
    /// Buys pay rune in (positive rune delta); sells pay rune out at
    /// settlement (negative rune delta).
    pub fn rune_volume(&self) -> Option<(SwapDirection, i64)> {
        match self.swap_direction? {
            SwapDirection::Buy if self.rune_amount > 0 => Some((SwapDirection::Buy, self.rune_amount)),
            SwapDirection::Sell if self.rune_amount < 0 => {
                Some((SwapDirection::Sell, -self.rune_amount))
            }
            _ => None,
        }
    }

    /// Whether this row opens a swap (the inbound side), used for counts.
    pub fn opens_swap(&self) -> bool {
        match self.swap_direction {
            Some(SwapDirection::Buy) => self.rune_amount > 0,
            Some(SwapDirection::Sell) => self.asset_amount > 0,
            None => false,
        }
    }
}

/// Bucket width for aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
    #[serde(rename = "quarter")]
    Quarter,
    #[serde(rename = "year")]
    Year,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::FiveMinutes => "5min",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
            Interval::Quarter => "quarter",
            Interval::Year => "year",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5min" => Ok(Interval::FiveMinutes),
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            "month" => Ok(Interval::Month),
            "quarter" => Ok(Interval::Quarter),
            "year" => Ok(Interval::Year),
            other => Err(format!("invalid interval: {other:?}")),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time summary of a pool, summed from its deltas.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolBasics {
    pub pool: Asset,
    pub asset_depth: i64,
    pub rune_depth: i64,
    pub units: i64,
    pub asset_staked: i64,
    pub rune_staked: i64,
    pub asset_withdrawn: i64,
    pub rune_withdrawn: i64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub buy_count: i64,
    pub sell_count: i64,
    pub rewards: i64,
    pub gas_used: i64,
    pub gas_replenished: i64,
    pub status: Option<PoolStatus>,
}

impl PoolBasics {
    /// Rune per unit of asset.
    pub fn price(&self) -> Decimal {
        ratio(self.rune_depth, self.asset_depth)
    }

    pub fn asset_roi(&self) -> Decimal {
        roi(self.asset_depth, self.asset_staked - self.asset_withdrawn)
    }

    pub fn rune_roi(&self) -> Decimal {
        roi(self.rune_depth, self.rune_staked - self.rune_withdrawn)
    }

    /// Mean of the asset and rune side returns.
    pub fn pool_roi(&self) -> Decimal {
        (self.asset_roi() + self.rune_roi()) / Decimal::TWO
    }
}

fn ratio(numerator: i64, denominator: i64) -> Decimal {
    Decimal::from(numerator)
        .checked_div(Decimal::from(denominator))
        .unwrap_or(Decimal::ZERO)
}

fn roi(depth: i64, net_staked: i64) -> Decimal {
    if net_staked <= 0 {
        return Decimal::ZERO;
    }
    ratio(depth - net_staked, net_staked)
}

/// Per-bucket changes of one pool with the depth carried forward.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolAggChanges {
    /// Bucket start, unix seconds.
    pub time: i64,
    pub asset_changes: i64,
    pub rune_changes: i64,
    pub units_changes: i64,
    pub asset_depth: i64,
    pub rune_depth: i64,
    pub units: i64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub buy_count: i64,
    pub sell_count: i64,
    pub price: Decimal,
}

/// Network-wide rune swap volume for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TotalVolChanges {
    /// Bucket start, unix seconds.
    pub time: i64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub total_volume: i64,
}
