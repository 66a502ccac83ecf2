use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Health snapshot of one chain pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain: CompactString,
    pub is_healthy: bool,
    pub last_event_id: i64,
    pub total_events_processed: i64,
}
