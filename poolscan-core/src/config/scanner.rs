use std::time::Duration;

/// Timing of the per-chain scanners.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Sleep between ticks once the block scanner has caught up.
    pub poll_interval: Duration,
    /// Sleep after an empty or failed feed fetch.
    pub retry_backoff: Duration,
    /// Nominal block time, used to derive feed event times from heights.
    pub block_interval: Duration,
    /// Last fully processed height to seed a fresh block scanner with.
    pub start_height: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(5),
            block_interval: Duration::from_secs(5),
            start_height: 0,
        }
    }
}
