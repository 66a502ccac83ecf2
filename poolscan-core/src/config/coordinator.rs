use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where per-chain pipelines read their events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineSource {
    /// The node's id-indexed REST feed, one pipeline per discovered chain.
    Feed,
    /// Tendermint block results, one pipeline per statically listed chain.
    Blocks,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often the active chain set is re-read.
    pub refresh_interval: Duration,
    pub source: PipelineSource,
    /// Chains to run when `source` is [`PipelineSource::Blocks`], or as a
    /// fixed set instead of discovery.
    pub static_chains: Vec<CompactString>,
}
