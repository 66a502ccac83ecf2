//! Tendermint RPC client (`status`, `block`, `block_results`).

use super::wire::{lenient_i64, nullable_string, nullable_vec};
use super::{BlockResults, BlockSource, ChainError, endpoint};
use crate::config::NodeConfig;
use crate::events::{Attributes, RawEvent};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(deserialize_with = "lenient_i64")]
    latest_block_height: i64,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    time: String,
}

#[derive(Debug, Deserialize)]
struct BlockResultsResult {
    #[serde(deserialize_with = "lenient_i64")]
    height: i64,
    #[serde(default, deserialize_with = "nullable_vec")]
    txs_results: Vec<TxResult>,
    #[serde(default, deserialize_with = "nullable_vec")]
    begin_block_events: Vec<WireEvent>,
    #[serde(default, deserialize_with = "nullable_vec")]
    end_block_events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default, deserialize_with = "nullable_vec")]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "nullable_vec")]
    attributes: Vec<WireAttribute>,
}

#[derive(Debug, Deserialize)]
struct WireAttribute {
    #[serde(default, deserialize_with = "nullable_string")]
    key: String,
    #[serde(default, deserialize_with = "nullable_string")]
    value: String,
}

/// Reads blocks over Tendermint RPC.
pub struct TendermintClient {
    base_url: Url,
    base64_attributes: bool,
    http_client: reqwest::Client,
}

impl TendermintClient {
    pub fn new(config: &NodeConfig) -> Result<Self, ChainError> {
        Ok(Self {
            base_url: config.tendermint_url.clone(),
            base64_attributes: config.base64_attributes,
            http_client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChainError> {
        let url = endpoint(&self.base_url, path)?;
        let response: RpcResponse<T> = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.result)
    }

    fn decode_text(&self, raw: String) -> Result<String, ChainError> {
        if !self.base64_attributes || raw.is_empty() {
            return Ok(raw);
        }
        Ok(String::from_utf8(STANDARD.decode(raw.as_bytes())?)?)
    }

    pub(crate) fn convert_events(
        &self,
        height: i64,
        events: Vec<WireEvent>,
    ) -> Result<Vec<RawEvent>, ChainError> {
        events
            .into_iter()
            .map(|event| {
                let attributes = event
                    .attributes
                    .into_iter()
                    .map(|attr| Ok((self.decode_text(attr.key)?, self.decode_text(attr.value)?)))
                    .collect::<Result<Attributes, ChainError>>()?;
                let mut raw = RawEvent::new(event.kind, attributes);
                raw.height = height;
                Ok(raw)
            })
            .collect()
    }
}

#[async_trait]
impl BlockSource for TendermintClient {
    async fn latest_height(&self) -> Result<i64, ChainError> {
        let status: StatusResult = self.get("status", &[]).await?;
        Ok(status.sync_info.latest_block_height)
    }

    async fn block(&self, height: i64) -> Result<BlockResults, ChainError> {
        let query = [("height", height.to_string())];
        let block: BlockResult = self.get("block", &query).await?;
        let time = OffsetDateTime::parse(&block.block.header.time, &Rfc3339)?.unix_timestamp();

        let results: BlockResultsResult = self.get("block_results", &query).await?;
        if results.height != height {
            return Err(ChainError::Format(format!(
                "asked for block {height}, node returned {}",
                results.height
            )));
        }
        debug!(height, txs = results.txs_results.len(), "Fetched block results");

        Ok(BlockResults {
            height,
            time,
            begin: self.convert_events(height, results.begin_block_events)?,
            txs: results
                .txs_results
                .into_iter()
                .map(|tx| self.convert_events(height, tx.events))
                .collect::<Result<_, _>>()?,
            end: self.convert_events(height, results.end_block_events)?,
        })
    }
}
