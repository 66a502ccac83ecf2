//! THORNode REST client: the id-indexed event feed, settlement lookups, chain
//! discovery and genesis time.

use super::wire::{lenient_i64, nullable_string, nullable_vec};
use super::{ChainDirectory, ChainError, EventFeed, endpoint};
use crate::config::NodeConfig;
use crate::events::{Attributes, RawEvent};
use async_trait::async_trait;
use compact_str::CompactString;
use itertools::Itertools;
use poolscan_sdk::objects::{Asset, Coin, EventStatus, Fee, Tx};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

#[derive(Debug, Deserialize)]
pub(crate) struct WireCoin {
    asset: String,
    #[serde(deserialize_with = "lenient_i64")]
    amount: i64,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireTx {
    #[serde(default, deserialize_with = "nullable_string")]
    id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    chain: String,
    #[serde(default, deserialize_with = "nullable_string")]
    from_address: String,
    #[serde(default, deserialize_with = "nullable_string")]
    to_address: String,
    #[serde(default, deserialize_with = "nullable_vec")]
    coins: Vec<WireCoin>,
    #[serde(default, deserialize_with = "nullable_string")]
    memo: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireFee {
    #[serde(default, deserialize_with = "nullable_vec")]
    coins: Vec<WireCoin>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pool_deduct: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFeedEvent {
    #[serde(deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(deserialize_with = "lenient_i64")]
    height: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "nullable_string")]
    status: String,
    #[serde(default)]
    in_tx: Option<WireTx>,
    #[serde(default, deserialize_with = "nullable_vec")]
    out_txs: Vec<WireTx>,
    #[serde(default)]
    fee: Option<WireFee>,
    #[serde(default)]
    event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TxLookup {
    #[serde(default, deserialize_with = "nullable_vec")]
    out_txs: Vec<WireTx>,
}

#[derive(Debug, Deserialize)]
struct PoolAddresses {
    #[serde(default, deserialize_with = "nullable_vec")]
    current: Vec<PoolAddress>,
}

#[derive(Debug, Deserialize)]
struct PoolAddress {
    chain: String,
}

#[derive(Debug, Deserialize)]
struct GenesisResponse {
    result: GenesisResult,
}

#[derive(Debug, Deserialize)]
struct GenesisResult {
    genesis: Genesis,
}

#[derive(Debug, Deserialize)]
struct Genesis {
    genesis_time: String,
}

fn convert_coins(coins: Vec<WireCoin>) -> Result<Vec<Coin>, ChainError> {
    coins
        .into_iter()
        .filter(|coin| !coin.asset.is_empty())
        .map(|coin| {
            let asset: Asset = coin
                .asset
                .parse()
                .map_err(|e| ChainError::Format(format!("coin asset: {e}")))?;
            Ok(Coin::new(asset, coin.amount))
        })
        .collect()
}

impl TryFrom<WireTx> for Tx {
    type Error = ChainError;

    fn try_from(tx: WireTx) -> Result<Self, Self::Error> {
        Ok(Tx {
            id: tx.id,
            chain: CompactString::from(tx.chain),
            from_address: tx.from_address,
            to_address: tx.to_address,
            coins: convert_coins(tx.coins)?,
            memo: tx.memo,
        })
    }
}

impl TryFrom<WireFeedEvent> for RawEvent {
    type Error = ChainError;

    fn try_from(event: WireFeedEvent) -> Result<Self, Self::Error> {
        let fee = match event.fee {
            Some(fee) => Some(Fee {
                coins: convert_coins(fee.coins)?,
                pool_deduct: fee.pool_deduct,
            }),
            None => None,
        };
        Ok(RawEvent {
            id: Some(event.id),
            height: event.height,
            kind: CompactString::from(event.kind.to_lowercase()),
            attributes: Attributes::from_json(&event.event),
            status: event.status.parse().ok(),
            in_tx: event.in_tx.map(Tx::try_from).transpose()?,
            out_txs: event
                .out_txs
                .into_iter()
                .map(Tx::try_from)
                .collect::<Result<_, _>>()?,
            fee,
        })
    }
}

/// REST client for a THORNode and its Tendermint genesis endpoint.
pub struct ThorNodeClient {
    thornode_url: Url,
    tendermint_url: Url,
    http_client: reqwest::Client,
}

impl ThorNodeClient {
    pub fn new(config: &NodeConfig) -> Result<Self, ChainError> {
        Ok(Self {
            thornode_url: config.thornode_url.clone(),
            tendermint_url: config.tendermint_url.clone(),
            http_client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?,
        })
    }

    async fn get<T: DeserializeOwned>(&self, base: &Url, path: &str) -> Result<T, ChainError> {
        let url = endpoint(base, path)?;
        Ok(self
            .http_client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl EventFeed for ThorNodeClient {
    async fn genesis_time(&self) -> Result<i64, ChainError> {
        let response: GenesisResponse = self.get(&self.tendermint_url, "genesis").await?;
        Ok(OffsetDateTime::parse(&response.result.genesis.genesis_time, &Rfc3339)?.unix_timestamp())
    }

    async fn events_after(&self, chain: &str, id: i64) -> Result<Vec<RawEvent>, ChainError> {
        let path = format!("thorchain/events/{}/{chain}", id + 1);
        let events: Option<Vec<WireFeedEvent>> = self.get(&self.thornode_url, &path).await?;
        events
            .unwrap_or_default()
            .into_iter()
            .filter(|event| event.id > id)
            .map(RawEvent::try_from)
            .collect()
    }

    async fn settlement_txs(&self, in_tx_id: &str) -> Result<Vec<Tx>, ChainError> {
        let path = format!("thorchain/tx/{in_tx_id}");
        let lookup: TxLookup = self.get(&self.thornode_url, &path).await?;
        lookup.out_txs.into_iter().map(Tx::try_from).collect()
    }
}

#[async_trait]
impl ChainDirectory for ThorNodeClient {
    async fn active_chains(&self) -> Result<Vec<CompactString>, ChainError> {
        let addresses: PoolAddresses = self
            .get(&self.thornode_url, "thorchain/pool_addresses")
            .await?;
        Ok(addresses
            .current
            .into_iter()
            .map(|address| CompactString::from(address.chain.to_uppercase()))
            .unique()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_event_conversion() {
        let json = r#"{
            "id": "12",
            "height": 340,
            "type": "swap",
            "status": "Success",
            "in_tx": {
                "id": "TX1",
                "chain": "BNB",
                "from_address": "bnb1from",
                "to_address": "bnb1vault",
                "coins": [{"asset": "BNB.BNB", "amount": "1000"}],
                "memo": "SWAP:THOR.RUNE"
            },
            "out_txs": null,
            "fee": {"coins": null, "pool_deduct": "0"},
            "event": {
                "pool": "BNB.BNB",
                "price_target": "0",
                "trade_slip": "12",
                "liquidity_fee": "3",
                "liquidity_fee_in_rune": 6
            }
        }"#;
        let wire: WireFeedEvent = serde_json::from_str(json).unwrap();
        let raw = RawEvent::try_from(wire).unwrap();
        assert_eq!(raw.id, Some(12));
        assert_eq!(raw.height, 340);
        assert_eq!(raw.kind, "swap");
        assert_eq!(raw.status, Some(EventStatus::Success));
        assert_eq!(raw.in_tx.as_ref().unwrap().coins[0].amount, 1000);
        assert!(raw.out_txs.is_empty());
        assert_eq!(raw.attributes.get("trade_slip"), Some("12"));
        assert_eq!(raw.attributes.get("liquidity_fee_in_rune"), Some("6"));
    }

    #[test]
    fn test_bad_coin_asset_is_a_format_error() {
        let wire = WireTx {
            id: "TX".to_owned(),
            coins: vec![WireCoin {
                asset: "A.B.C".to_owned(),
                amount: 1,
            }],
            ..Default::default()
        };
        assert!(matches!(Tx::try_from(wire), Err(ChainError::Format(_))));
    }
}
