use compact_str::CompactString;
use poolscan_sdk::objects::ChainStatus;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Health counters of one chain pipeline, updated by its task and read from
/// anywhere through [`PipelineStatus::snapshot`].
#[derive(Debug)]
pub struct PipelineStatus {
    chain: CompactString,
    healthy: AtomicBool,
    last_event_id: AtomicI64,
    total_events_processed: AtomicI64,
}

impl PipelineStatus {
    pub fn new(chain: impl Into<CompactString>) -> Self {
        Self {
            chain: chain.into(),
            healthy: AtomicBool::new(false),
            last_event_id: AtomicI64::new(0),
            total_events_processed: AtomicI64::new(0),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Seeds the last id from the store on startup.
    pub fn resume_from(&self, last_event_id: i64) {
        self.last_event_id.fetch_max(last_event_id, Ordering::Relaxed);
    }

    pub fn record(&self, event_id: i64) {
        self.last_event_id.fetch_max(event_id, Ordering::Relaxed);
        self.total_events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_event_id(&self) -> i64 {
        self.last_event_id.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ChainStatus {
        ChainStatus {
            chain: self.chain.clone(),
            is_healthy: self.healthy.load(Ordering::Relaxed),
            last_event_id: self.last_event_id.load(Ordering::Relaxed),
            total_events_processed: self.total_events_processed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_id_only_grows() {
        let status = PipelineStatus::new("BNB");
        status.resume_from(10);
        status.record(4);
        status.record(12);
        let snapshot = status.snapshot();
        assert_eq!(snapshot.last_event_id, 12);
        assert_eq!(snapshot.total_events_processed, 2);
        assert!(!snapshot.is_healthy);
    }
}
