//! UTC bucket arithmetic and delta folding shared by every ledger store.

use super::StoreError;
use poolscan_sdk::objects::{
    Asset, EventType, Interval, PoolAggChanges, PoolBasics, PoolChange, SwapDirection,
    TotalVolChanges,
};
use rust_decimal::Decimal;
use time::{Date, Month, OffsetDateTime};

pub const MAX_BUCKETS: usize = 10_000;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Start of the bucket containing `ts`.
pub fn truncate(ts: i64, interval: Interval) -> Result<i64, StoreError> {
    let fixed = |width: i64| ts - ts.rem_euclid(width);
    Ok(match interval {
        Interval::FiveMinutes => fixed(5 * MINUTE),
        Interval::Hour => fixed(HOUR),
        Interval::Day => fixed(DAY),
        Interval::Week => {
            // 1970-01-01 was a Thursday
            let day = ts.div_euclid(DAY);
            let since_monday = (day + 3).rem_euclid(7);
            (day - since_monday) * DAY
        }
        Interval::Month | Interval::Quarter | Interval::Year => {
            let date = OffsetDateTime::from_unix_timestamp(ts)?.date();
            let month = match interval {
                Interval::Month => date.month(),
                Interval::Quarter => Month::try_from(((date.month() as u8 - 1) / 3) * 3 + 1)?,
                _ => Month::January,
            };
            month_start(date.year(), month)?
        }
    })
}

/// Start of the bucket following the one starting at `start`.
pub fn next_bucket(start: i64, interval: Interval) -> Result<i64, StoreError> {
    let months = match interval {
        Interval::FiveMinutes => return Ok(start + 5 * MINUTE),
        Interval::Hour => return Ok(start + HOUR),
        Interval::Day => return Ok(start + DAY),
        Interval::Week => return Ok(start + 7 * DAY),
        Interval::Month => 1,
        Interval::Quarter => 3,
        Interval::Year => 12,
    };
    let date = OffsetDateTime::from_unix_timestamp(start)?.date();
    let index = date.year() * 12 + (date.month() as i32 - 1) + months;
    month_start(index.div_euclid(12), Month::try_from(index.rem_euclid(12) as u8 + 1)?)
}

fn month_start(year: i32, month: Month) -> Result<i64, StoreError> {
    Ok(Date::from_calendar_date(year, month, 1)?
        .midnight()
        .assume_utc()
        .unix_timestamp())
}

/// Bucket starts covering `[truncate(from), to)`.
pub fn bucket_starts(interval: Interval, from: i64, to: i64) -> Result<Vec<i64>, StoreError> {
    if to <= from {
        return Err(StoreError::InvalidRange { from, to });
    }
    let mut starts = Vec::new();
    let mut start = truncate(from, interval)?;
    while start < to {
        if starts.len() == MAX_BUCKETS {
            return Err(StoreError::RangeTooLarge(MAX_BUCKETS + 1));
        }
        starts.push(start);
        start = next_bucket(start, interval)?;
    }
    Ok(starts)
}

fn bucket_index(starts: &[i64], time: i64) -> Option<usize> {
    starts.partition_point(|start| *start <= time).checked_sub(1)
}

/// Folds one delta into a running pool summary.
pub fn apply_to_basics(basics: &mut PoolBasics, change: &PoolChange) {
    basics.asset_depth += change.asset_amount;
    basics.rune_depth += change.rune_amount;
    basics.units += change.units;
    match change.event_type {
        EventType::Stake => {
            basics.asset_staked += change.asset_amount;
            basics.rune_staked += change.rune_amount;
        }
        EventType::Unstake => {
            basics.asset_withdrawn -= change.asset_amount;
            basics.rune_withdrawn -= change.rune_amount;
        }
        EventType::Reward => basics.rewards += change.rune_amount,
        EventType::Gas => {
            basics.gas_used -= change.asset_amount;
            basics.gas_replenished += change.rune_amount;
        }
        _ => {}
    }
    match change.rune_volume() {
        Some((SwapDirection::Buy, volume)) => basics.buy_volume += volume,
        Some((SwapDirection::Sell, volume)) => basics.sell_volume += volume,
        None => {}
    }
    if change.opens_swap() {
        match change.swap_direction {
            Some(SwapDirection::Buy) => basics.buy_count += 1,
            Some(SwapDirection::Sell) => basics.sell_count += 1,
            None => {}
        }
    }
    if let Some(status) = change.status {
        basics.status = Some(status);
    }
}

/// Summary of `pool` from its deltas in insertion order.
pub fn pool_basics<'a>(pool: &Asset, changes: impl IntoIterator<Item = &'a PoolChange>) -> PoolBasics {
    let mut basics = PoolBasics {
        pool: pool.clone(),
        ..Default::default()
    };
    for change in changes {
        apply_to_basics(&mut basics, change);
    }
    basics
}

/// Depth of a pool at the start of a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Depths {
    pub asset_depth: i64,
    pub rune_depth: i64,
    pub units: i64,
}

impl Depths {
    pub fn sum<'a>(changes: impl IntoIterator<Item = &'a PoolChange>) -> Self {
        changes.into_iter().fold(Self::default(), |acc, change| Self {
            asset_depth: acc.asset_depth + change.asset_amount,
            rune_depth: acc.rune_depth + change.rune_amount,
            units: acc.units + change.units,
        })
    }
}

/// Buckets one pool's deltas over `[truncate(from), to)`.
///
/// `opening` is the depth strictly before the first bucket; deltas outside
/// the range are ignored. Every bucket is emitted, empty ones carrying the
/// previous depth.
pub fn pool_agg_changes<'a>(
    interval: Interval,
    from: i64,
    to: i64,
    opening: Depths,
    changes: impl IntoIterator<Item = &'a PoolChange>,
) -> Result<Vec<PoolAggChanges>, StoreError> {
    let starts = bucket_starts(interval, from, to)?;
    let mut buckets: Vec<PoolAggChanges> = starts
        .iter()
        .map(|start| PoolAggChanges {
            time: *start,
            ..Default::default()
        })
        .collect();

    for change in changes {
        if change.time >= to {
            continue;
        }
        let Some(index) = bucket_index(&starts, change.time) else {
            continue;
        };
        let bucket = &mut buckets[index];
        bucket.asset_changes += change.asset_amount;
        bucket.rune_changes += change.rune_amount;
        bucket.units_changes += change.units;
        match change.rune_volume() {
            Some((SwapDirection::Buy, volume)) => bucket.buy_volume += volume,
            Some((SwapDirection::Sell, volume)) => bucket.sell_volume += volume,
            None => {}
        }
        if change.opens_swap() {
            match change.swap_direction {
                Some(SwapDirection::Buy) => bucket.buy_count += 1,
                Some(SwapDirection::Sell) => bucket.sell_count += 1,
                None => {}
            }
        }
    }

    let mut depth = opening;
    for bucket in &mut buckets {
        depth.asset_depth += bucket.asset_changes;
        depth.rune_depth += bucket.rune_changes;
        depth.units += bucket.units_changes;
        bucket.asset_depth = depth.asset_depth;
        bucket.rune_depth = depth.rune_depth;
        bucket.units = depth.units;
        bucket.price = Decimal::from(depth.rune_depth)
            .checked_div(Decimal::from(depth.asset_depth))
            .unwrap_or(Decimal::ZERO);
    }
    Ok(buckets)
}

/// Buckets network-wide rune swap volume over `[truncate(from), to)`.
pub fn total_vol_changes<'a>(
    interval: Interval,
    from: i64,
    to: i64,
    changes: impl IntoIterator<Item = &'a PoolChange>,
) -> Result<Vec<TotalVolChanges>, StoreError> {
    let starts = bucket_starts(interval, from, to)?;
    let mut buckets: Vec<TotalVolChanges> = starts
        .iter()
        .map(|start| TotalVolChanges {
            time: *start,
            ..Default::default()
        })
        .collect();
    for change in changes {
        if change.time >= to {
            continue;
        }
        let (Some(index), Some((direction, volume))) =
            (bucket_index(&starts, change.time), change.rune_volume())
        else {
            continue;
        };
        let bucket = &mut buckets[index];
        match direction {
            SwapDirection::Buy => bucket.buy_volume += volume,
            SwapDirection::Sell => bucket.sell_volume += volume,
        }
        bucket.total_volume += volume;
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-03-17T13:47:12Z, a Wednesday
    const TS: i64 = 1_615_988_832;

    #[test]
    fn test_truncate_each_interval() {
        assert_eq!(truncate(TS, Interval::FiveMinutes).unwrap(), 1_615_988_700);
        assert_eq!(truncate(TS, Interval::Hour).unwrap(), 1_615_986_000);
        assert_eq!(truncate(TS, Interval::Day).unwrap(), 1_615_939_200);
        // Monday 2021-03-15
        assert_eq!(truncate(TS, Interval::Week).unwrap(), 1_615_766_400);
        // 2021-03-01
        assert_eq!(truncate(TS, Interval::Month).unwrap(), 1_614_556_800);
        // 2021-01-01
        assert_eq!(truncate(TS, Interval::Quarter).unwrap(), 1_609_459_200);
        assert_eq!(truncate(TS, Interval::Year).unwrap(), 1_609_459_200);
    }

    #[test]
    fn test_next_bucket_rolls_over_years() {
        // 2020-12-01 -> 2021-01-01
        assert_eq!(next_bucket(1_606_780_800, Interval::Month).unwrap(), 1_609_459_200);
        // 2020-10-01 -> 2021-01-01
        assert_eq!(next_bucket(1_601_510_400, Interval::Quarter).unwrap(), 1_609_459_200);
        // 2020-01-01 -> 2021-01-01
        assert_eq!(next_bucket(1_577_836_800, Interval::Year).unwrap(), 1_609_459_200);
    }

    #[test]
    fn test_bucket_range_limits() {
        assert!(matches!(
            bucket_starts(Interval::Day, 100, 100),
            Err(StoreError::InvalidRange { .. })
        ));
        assert!(matches!(
            bucket_starts(Interval::FiveMinutes, 0, 300 * 10_001),
            Err(StoreError::RangeTooLarge(_))
        ));
        assert_eq!(bucket_starts(Interval::FiveMinutes, 0, 300 * 10_000).unwrap().len(), 10_000);
        // the partial first bucket is included
        assert_eq!(bucket_starts(Interval::Hour, 1800, 3601).unwrap(), vec![0, 3600]);
    }

    fn change(time: i64, asset: i64, rune: i64) -> PoolChange {
        let mut change = PoolChange::new(
            time,
            1,
            1,
            EventType::Stake,
            "BNB.BNB".parse().unwrap(),
        );
        change.asset_amount = asset;
        change.rune_amount = rune;
        change
    }

    #[test]
    fn test_depth_carries_through_empty_buckets() {
        let changes = [change(10, 100, 200), change(7300, -50, 0)];
        let opening = Depths {
            asset_depth: 1000,
            rune_depth: 2000,
            units: 0,
        };
        let buckets = pool_agg_changes(Interval::Hour, 0, 3 * HOUR, opening, &changes).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].asset_changes, 100);
        assert_eq!(buckets[0].asset_depth, 1100);
        assert_eq!(buckets[1].asset_changes, 0);
        assert_eq!(buckets[1].asset_depth, 1100);
        assert_eq!(buckets[2].asset_depth, 1050);
        assert_eq!(buckets[2].rune_depth, 2200);
    }

    #[test]
    fn test_total_volume_splits_directions() {
        let mut buy = change(10, 0, 300);
        buy.event_type = EventType::Swap;
        buy.swap_direction = Some(SwapDirection::Buy);
        let mut sell = change(20, 0, -120);
        sell.event_type = EventType::Swap;
        sell.swap_direction = Some(SwapDirection::Sell);
        let buckets = total_vol_changes(Interval::Day, 0, DAY, [&buy, &sell]).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].buy_volume, 300);
        assert_eq!(buckets[0].sell_volume, 120);
        assert_eq!(buckets[0].total_volume, 420);
    }
}
