use compact_str::CompactString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Ticker of the settlement asset every pool is paired against.
pub const RUNE_TICKER: &str = "RUNE";

/// Chain assumed for asset strings that carry no `CHAIN.` prefix.
pub const NATIVE_CHAIN: &str = "THOR";

/// A pooled asset, e.g. `BNB.TCAN-014`.
///
/// The ticker is always derived from the symbol (the part before the first
/// `-`), so the three fields can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Asset {
    chain: CompactString,
    symbol: CompactString,
    ticker: CompactString,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetParseError {
    #[error("empty asset string")]
    Empty,
    #[error("invalid asset string: {0:?}")]
    Invalid(String),
}

impl Asset {
    pub fn new(chain: &str, symbol: &str) -> Self {
        let chain = CompactString::from(chain.to_uppercase());
        let symbol = CompactString::from(symbol.to_uppercase());
        let ticker = symbol
            .split('-')
            .next()
            .map(CompactString::from)
            .unwrap_or_default();
        Self {
            chain,
            symbol,
            ticker,
        }
    }

    /// The native rune asset.
    pub fn rune() -> Self {
        Self::new(NATIVE_CHAIN, RUNE_TICKER)
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// Whether this is rune on any chain (`THOR.RUNE`, `BNB.RUNE-B1A`, ...).
    pub fn is_rune(&self) -> bool {
        self.ticker == RUNE_TICKER
    }

    pub fn is_empty(&self) -> bool {
        self.symbol.is_empty()
    }
}

impl FromStr for Asset {
    type Err = AssetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AssetParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(AssetParseError::Invalid(s.to_owned()));
        }
        let (chain, symbol) = match s.split_once('.') {
            Some((chain, symbol)) => (chain, symbol),
            None => (NATIVE_CHAIN, s),
        };
        if chain.is_empty() || symbol.is_empty() || symbol.contains('.') {
            return Err(AssetParseError::Invalid(s.to_owned()));
        }
        Ok(Self::new(chain, symbol))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chain, self.symbol)
    }
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An amount of a single asset, in the chain's base units (1e8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub asset: Asset,
    pub amount: i64,
}

impl Coin {
    pub fn new(asset: Asset, amount: i64) -> Self {
        Self { asset, amount }
    }
}

/// A signed amount attributed to a pool (rewards, slashes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAmount {
    pub pool: Asset,
    pub amount: i64,
}
