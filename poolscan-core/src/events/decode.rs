//! Per-type decoders from [`Attributes`] into typed payloads.

use itertools::izip;
use poolscan_sdk::objects::{
    AssetParseError, DomainEvent, ErrataPool, EventAdd, EventErrata, EventGas, EventPool,
    EventRefund, EventReward, EventSlash, EventStake, EventSwap, EventType, EventUnstake, Fee,
    GasPool, PoolAmount, Tx,
};
use thiserror::Error;

use super::RawEvent;
use super::attributes::{
    Attributes, parse_asset, parse_bool, parse_coins, parse_int, parse_pool_status,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing attribute `{0}`")]
    Missing(String),

    #[error("invalid value {value:?} for attribute `{key}`")]
    Invalid { key: String, value: String },

    #[error("mismatched repeated attributes: {0}")]
    Mismatched(String),

    #[error("invalid asset: {0}")]
    Asset(#[from] AssetParseError),
}

/// Fee correlation: attaches to the stored events of `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFee {
    pub tx_id: String,
    pub fee: Fee,
}

/// Outbound correlation: one settlement leg of the events of `in_tx_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutbound {
    pub in_tx_id: String,
    pub tx: Tx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Domain { payload: DomainEvent, in_tx: Tx },
    Fee(EventFee),
    Outbound(EventOutbound),
}

/// Decodes `raw` as an event of type `event_type`.
///
/// Structured transactions on the raw event win over the attribute form.
pub fn decode(event_type: EventType, raw: &RawEvent) -> Result<Decoded, DecodeError> {
    let attrs = &raw.attributes;
    let payload = match event_type {
        EventType::Stake => DomainEvent::Stake(decode_stake(attrs)?),
        EventType::Swap => DomainEvent::Swap(decode_swap(attrs)?),
        EventType::Unstake => DomainEvent::Unstake(decode_unstake(attrs)?),
        EventType::Reward => DomainEvent::Reward(decode_reward(attrs)?),
        EventType::Refund => DomainEvent::Refund(decode_refund(attrs)?),
        EventType::Add => DomainEvent::Add(EventAdd {
            pool: parse_asset(attrs.require("pool")?)?,
        }),
        EventType::Pool => DomainEvent::Pool(EventPool {
            pool: parse_asset(attrs.require("pool")?)?,
            status: parse_pool_status(attrs.get("pool_status").unwrap_or_default()),
        }),
        EventType::Gas => DomainEvent::Gas(decode_gas(attrs)?),
        EventType::Slash => DomainEvent::Slash(decode_slash(attrs)?),
        EventType::Errata => DomainEvent::Errata(decode_errata(attrs)?),
        EventType::Fee => return decode_fee(raw).map(Decoded::Fee),
        EventType::Outbound => return decode_outbound(raw).map(Decoded::Outbound),
    };
    let in_tx = match &raw.in_tx {
        Some(tx) => tx.clone(),
        None if attrs.contains("id") => tx_from_attributes(attrs)?,
        None => Tx::default(),
    };
    Ok(Decoded::Domain { payload, in_tx })
}

/// Reads a transaction from `id, chain, from, to, coin|coins, memo`.
pub fn tx_from_attributes(attrs: &Attributes) -> Result<Tx, DecodeError> {
    let coins = match attrs.get("coins").or_else(|| attrs.get("coin")) {
        Some(coins) => parse_coins(coins)?,
        None => Vec::new(),
    };
    Ok(Tx {
        id: attrs.require("id")?.to_owned(),
        chain: attrs.get("chain").unwrap_or_default().into(),
        from_address: attrs.get("from").unwrap_or_default().to_owned(),
        to_address: attrs.get("to").unwrap_or_default().to_owned(),
        coins,
        memo: attrs.get("memo").unwrap_or_default().to_owned(),
    })
}

fn decode_stake(attrs: &Attributes) -> Result<EventStake, DecodeError> {
    Ok(EventStake {
        pool: parse_asset(attrs.require("pool")?)?,
        stake_units: attrs.int("stake_units")?,
    })
}

fn decode_swap(attrs: &Attributes) -> Result<EventSwap, DecodeError> {
    Ok(EventSwap {
        pool: parse_asset(attrs.require("pool")?)?,
        price_target: attrs.int_or_zero("price_target")?,
        trade_slip: attrs.int_or_zero("trade_slip")?,
        liquidity_fee: attrs.int_or_zero("liquidity_fee")?,
        liquidity_fee_in_rune: attrs.int_or_zero("liquidity_fee_in_rune")?,
    })
}

fn decode_unstake(attrs: &Attributes) -> Result<EventUnstake, DecodeError> {
    Ok(EventUnstake {
        pool: parse_asset(attrs.require("pool")?)?,
        stake_units: attrs.int("stake_units")?,
        basis_points: attrs.int_or_zero("basis_points")?,
    })
}

fn decode_reward(attrs: &Attributes) -> Result<EventReward, DecodeError> {
    Ok(EventReward {
        bond_reward: attrs.int_or_zero("bond_reward")?,
        pool_rewards: pool_amounts(attrs)?,
    })
}

fn decode_refund(attrs: &Attributes) -> Result<EventRefund, DecodeError> {
    Ok(EventRefund {
        code: attrs.int_or_zero("code")?,
        reason: attrs.get("reason").unwrap_or_default().to_owned(),
    })
}

fn decode_gas(attrs: &Attributes) -> Result<EventGas, DecodeError> {
    let assets: Vec<_> = attrs.get_all("asset").collect();
    let asset_amts: Vec<_> = attrs.get_all("asset_amt").collect();
    let rune_amts: Vec<_> = attrs.get_all("rune_amt").collect();
    if asset_amts.len() != assets.len() || rune_amts.len() != assets.len() {
        return Err(DecodeError::Mismatched("asset, asset_amt, rune_amt".to_owned()));
    }
    let pools = izip!(assets, asset_amts, rune_amts)
        .map(|(asset, asset_amt, rune_amt)| {
            Ok(GasPool {
                asset: parse_asset(asset)?,
                asset_amt: parse_int("asset_amt", asset_amt)?,
                rune_amt: parse_int("rune_amt", rune_amt)?,
            })
        })
        .collect::<Result<_, DecodeError>>()?;
    Ok(EventGas { pools })
}

fn decode_slash(attrs: &Attributes) -> Result<EventSlash, DecodeError> {
    Ok(EventSlash {
        pool: parse_asset(attrs.require("pool")?)?,
        slash_amount: pool_amounts(attrs)?,
    })
}

fn decode_errata(attrs: &Attributes) -> Result<EventErrata, DecodeError> {
    let assets: Vec<_> = attrs.get_all("asset").collect();
    let rune_amts: Vec<_> = attrs.get_all("rune_amt").collect();
    let rune_adds: Vec<_> = attrs.get_all("rune_add").collect();
    let asset_amts: Vec<_> = attrs.get_all("asset_amt").collect();
    let asset_adds: Vec<_> = attrs.get_all("asset_add").collect();
    let n = assets.len();
    if [rune_amts.len(), rune_adds.len(), asset_amts.len(), asset_adds.len()]
        .iter()
        .any(|len| *len != n)
    {
        return Err(DecodeError::Mismatched(
            "asset, rune_amt, rune_add, asset_amt, asset_add".to_owned(),
        ));
    }
    let pools = izip!(assets, rune_amts, rune_adds, asset_amts, asset_adds)
        .map(|(asset, rune_amt, rune_add, asset_amt, asset_add)| {
            Ok(ErrataPool {
                asset: parse_asset(asset)?,
                rune_amt: parse_int("rune_amt", rune_amt)?,
                rune_add: parse_bool("rune_add", rune_add)?,
                asset_amt: parse_int("asset_amt", asset_amt)?,
                asset_add: parse_bool("asset_add", asset_add)?,
            })
        })
        .collect::<Result<_, DecodeError>>()?;
    Ok(EventErrata { pools })
}

/// Per-pool amounts, either as repeated `asset`/`amount` pairs or as
/// `<asset>=<amount>` keys.
fn pool_amounts(attrs: &Attributes) -> Result<Vec<PoolAmount>, DecodeError> {
    if attrs.contains("asset") {
        let assets: Vec<_> = attrs.get_all("asset").collect();
        let amounts: Vec<_> = attrs.get_all("amount").collect();
        if assets.len() != amounts.len() {
            return Err(DecodeError::Mismatched("asset, amount".to_owned()));
        }
        return assets
            .into_iter()
            .zip(amounts)
            .map(|(asset, amount)| {
                Ok(PoolAmount {
                    pool: parse_asset(asset)?,
                    amount: parse_int("amount", amount)?,
                })
            })
            .collect();
    }
    attrs
        .iter()
        .filter(|(key, _)| key.contains('.'))
        .map(|(key, value)| {
            Ok(PoolAmount {
                pool: parse_asset(key)?,
                amount: parse_int(key, value)?,
            })
        })
        .collect()
}

fn decode_fee(raw: &RawEvent) -> Result<EventFee, DecodeError> {
    let attrs = &raw.attributes;
    let tx_id = match (attrs.get("tx_id"), &raw.in_tx) {
        (Some(id), _) => id.to_owned(),
        (None, Some(tx)) => tx.id.clone(),
        (None, None) => return Err(DecodeError::Missing("tx_id".to_owned())),
    };
    let fee = if attrs.contains("coins") || attrs.contains("pool_deduct") {
        Fee {
            coins: parse_coins(attrs.get("coins").unwrap_or_default())?,
            pool_deduct: attrs.int_or_zero("pool_deduct")?,
        }
    } else {
        raw.fee.clone().unwrap_or_default()
    };
    Ok(EventFee { tx_id, fee })
}

fn decode_outbound(raw: &RawEvent) -> Result<EventOutbound, DecodeError> {
    let attrs = &raw.attributes;
    let in_tx_id = match (attrs.get("in_tx_id"), &raw.in_tx) {
        (Some(id), _) => id.to_owned(),
        (None, Some(tx)) => tx.id.clone(),
        (None, None) => return Err(DecodeError::Missing("in_tx_id".to_owned())),
    };
    let tx = match raw.out_txs.first() {
        Some(tx) => tx.clone(),
        None => tx_from_attributes(attrs)?,
    };
    Ok(EventOutbound { in_tx_id, tx })
}
