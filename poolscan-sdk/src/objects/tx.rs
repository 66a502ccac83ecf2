use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use super::asset::Coin;

/// Transaction id the chain uses for "no distinct output transaction".
///
/// Intermediate legs of a double-hop swap settle with this id.
pub const BLANK_TX_ID: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// An inbound or outbound transaction attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tx {
    pub id: String,
    #[serde(default)]
    pub chain: CompactString,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
    #[serde(default)]
    pub coins: Vec<Coin>,
    #[serde(default)]
    pub memo: String,
}

impl Tx {
    pub fn is_blank(&self) -> bool {
        self.id == BLANK_TX_ID
    }
}

/// Network fee charged on an outbound.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fee {
    #[serde(default)]
    pub coins: Vec<Coin>,
    /// Rune taken out of the pool to cover the fee.
    #[serde(default)]
    pub pool_deduct: i64,
}

impl Fee {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty() && self.pool_deduct == 0
    }
}
