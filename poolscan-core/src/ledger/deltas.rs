//! Pool deltas derived from events and their correlations.

use poolscan_sdk::objects::{
    Asset, Coin, DomainEvent, Event, EventType, Fee, PoolChange, SwapDirection, Tx,
};

fn change(event: &Event, pool: &Asset, time: i64, height: i64) -> PoolChange {
    PoolChange::new(time, height, event.id, event.event_type(), pool.clone())
}

/// Whether `coin` sits on one side of `pool`.
fn in_pool(coin: &Coin, pool: &Asset) -> bool {
    coin.asset.is_rune() || coin.asset == *pool
}

fn add_coins(change: &mut PoolChange, coins: &[Coin], sign: i64) {
    for coin in coins.iter().filter(|coin| in_pool(coin, &change.pool)) {
        if coin.asset.is_rune() {
            change.rune_amount += sign * coin.amount;
        } else {
            change.asset_amount += sign * coin.amount;
        }
    }
}

/// Deltas recorded when `event` is first stored, including any settlement
/// legs and fee it already carries.
pub fn creation_changes(event: &Event) -> Vec<PoolChange> {
    let (time, height) = (event.time, event.height);
    let mut changes = match &event.payload {
        DomainEvent::Stake(stake) => {
            let mut row = change(event, &stake.pool, time, height);
            add_coins(&mut row, &event.in_tx.coins, 1);
            row.units = stake.stake_units;
            vec![row]
        }
        DomainEvent::Add(add) => {
            let mut row = change(event, &add.pool, time, height);
            add_coins(&mut row, &event.in_tx.coins, 1);
            vec![row]
        }
        DomainEvent::Unstake(unstake) => {
            let mut row = change(event, &unstake.pool, time, height);
            row.units = -unstake.stake_units;
            vec![row]
        }
        DomainEvent::Swap(swap) => {
            let mut row = change(event, &swap.pool, time, height);
            add_coins(&mut row, &event.in_tx.coins, 1);
            row.swap_direction = Some(if row.rune_amount > 0 {
                SwapDirection::Buy
            } else {
                SwapDirection::Sell
            });
            row.trade_slip = Some(swap.trade_slip);
            row.liquidity_fee = Some(swap.liquidity_fee);
            vec![row]
        }
        DomainEvent::Refund(_) => Vec::new(),
        DomainEvent::Reward(reward) => reward
            .pool_rewards
            .iter()
            .map(|pool_reward| {
                let mut row = change(event, &pool_reward.pool, time, height);
                row.rune_amount = pool_reward.amount;
                row
            })
            .collect(),
        DomainEvent::Gas(gas) => gas
            .pools
            .iter()
            .map(|pool| {
                let mut row = change(event, &pool.asset, time, height);
                row.asset_amount = -pool.asset_amt;
                row.rune_amount = pool.rune_amt;
                row
            })
            .collect(),
        DomainEvent::Slash(slash) => {
            let mut row = change(event, &slash.pool, time, height);
            for amount in &slash.slash_amount {
                if amount.pool.is_rune() {
                    row.rune_amount += amount.amount;
                } else {
                    row.asset_amount += amount.amount;
                }
            }
            vec![row]
        }
        DomainEvent::Errata(errata) => errata
            .pools
            .iter()
            .map(|pool| {
                let mut row = change(event, &pool.asset, time, height);
                row.rune_amount = if pool.rune_add { pool.rune_amt } else { -pool.rune_amt };
                row.asset_amount = if pool.asset_add { pool.asset_amt } else { -pool.asset_amt };
                row
            })
            .collect(),
        DomainEvent::Pool(pool) => {
            let mut row = change(event, &pool.pool, time, height);
            row.status = Some(pool.status);
            vec![row]
        }
    };
    for tx in &event.out_txs {
        changes.extend(settlement_changes(event, tx, time, height));
    }
    if !event.fee.is_empty() {
        changes.extend(fee_changes(event, &event.fee, time, height));
    }
    changes
}

/// Deltas for one outbound leg of `event`.
///
/// Swaps and unstakes pay out of the pool; refunds never touched it.
pub fn settlement_changes(event: &Event, tx: &Tx, time: i64, height: i64) -> Vec<PoolChange> {
    match &event.payload {
        DomainEvent::Swap(swap) => {
            let mut row = change(event, &swap.pool, time, height);
            add_coins(&mut row, &tx.coins, -1);
            if row.rune_amount == 0 && row.asset_amount == 0 {
                return Vec::new();
            }
            row.swap_direction = Some(if row.rune_amount < 0 {
                SwapDirection::Sell
            } else {
                SwapDirection::Buy
            });
            vec![row]
        }
        DomainEvent::Unstake(unstake) => {
            let mut row = change(event, &unstake.pool, time, height);
            add_coins(&mut row, &tx.coins, -1);
            vec![row]
        }
        _ => Vec::new(),
    }
}

/// Input delta of the second leg of a double-hop swap, fed by the
/// intermediate rune the first leg paid out.
pub fn intermediate_input_changes(
    second: &Event,
    intermediate: &Tx,
    time: i64,
    height: i64,
) -> Vec<PoolChange> {
    let DomainEvent::Swap(swap) = &second.payload else {
        return Vec::new();
    };
    let rune: i64 = intermediate
        .coins
        .iter()
        .filter(|coin| coin.asset.is_rune())
        .map(|coin| coin.amount)
        .sum();
    if rune == 0 {
        return Vec::new();
    }
    let mut row = change(second, &swap.pool, time, height);
    row.rune_amount = rune;
    row.swap_direction = Some(SwapDirection::Buy);
    vec![row]
}

/// The pool side of a network fee: the asset stays in the pool and the
/// deducted rune leaves it.
pub fn fee_changes(event: &Event, fee: &Fee, time: i64, height: i64) -> Vec<PoolChange> {
    fee.coins
        .iter()
        .filter(|coin| !coin.asset.is_rune())
        .map(|coin| {
            let mut row = PoolChange::new(time, height, event.id, EventType::Fee, coin.asset.clone());
            row.asset_amount = coin.amount;
            row.rune_amount = -fee.pool_deduct;
            row
        })
        .collect()
}
