//! Raw events as delivered by the chain sources, and their decoding into
//! the typed event model.

pub mod attributes;
pub mod decode;

pub use attributes::{Attributes, parse_asset, parse_coins, parse_pool_status};
pub use decode::{DecodeError, Decoded, EventFee, EventOutbound, decode};

use compact_str::CompactString;
use poolscan_sdk::objects::{EventStatus, Fee, Tx};

/// One event as it came off the wire, before its type is known.
///
/// Block results only fill `kind` and `attributes`; feed events also carry
/// their id and the structured transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Chain-assigned id (feed only).
    pub id: Option<i64>,
    pub height: i64,
    pub kind: CompactString,
    pub attributes: Attributes,
    pub status: Option<EventStatus>,
    pub in_tx: Option<Tx>,
    pub out_txs: Vec<Tx>,
    pub fee: Option<Fee>,
}

impl RawEvent {
    pub fn new(kind: impl Into<CompactString>, attributes: Attributes) -> Self {
        Self {
            kind: kind.into(),
            attributes,
            ..Default::default()
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.kind == "outbound"
    }
}
