use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use poolscan_sdk::objects::PoolChange;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PoolChangeRecord {
    pub time: i64,
    pub height: i64,
    pub event_id: i64,
    pub event_type: String,
    pub pool: String,
    pub asset_amount: i64,
    pub rune_amount: i64,
    pub units: i64,
    pub status: Option<String>,
    pub swap_direction: Option<String>,
    pub trade_slip: Option<i64>,
    pub liquidity_fee: Option<i64>,
}

/// Summed depth of one pool before a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct OpeningDepth {
    pub asset_depth: i64,
    pub rune_depth: i64,
    pub units: i64,
}

#[derive(Debug, Clone)]
/// Every pool that has at least one delta.
pub struct ListPools;

impl Processor<ListPools> for DatabaseProcessor {
    type Output = Vec<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPools")]
    async fn process(&self, _: ListPools) -> Result<Vec<String>, sqlx::Error> {
        let pools = sqlx::query_scalar(
            r#"
            SELECT DISTINCT pool
            FROM pool_changes
            ORDER BY pool
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(pools)
    }
}

/// Folded summary of one pool, computed by the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct PoolBasicsRecord {
    pub asset_depth: i64,
    pub rune_depth: i64,
    pub units: i64,
    pub asset_staked: i64,
    pub rune_staked: i64,
    pub asset_withdrawn: i64,
    pub rune_withdrawn: i64,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub buy_count: i64,
    pub sell_count: i64,
    pub rewards: i64,
    pub gas_used: i64,
    pub gas_replenished: i64,
    /// Latest non-null status row.
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
/// Summary of one pool over its deltas, optionally up to a height.
pub struct GetPoolBasics {
    pub pool: String,
    pub at_height: Option<i64>,
}

impl Processor<GetPoolBasics> for DatabaseProcessor {
    type Output = PoolBasicsRecord;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPoolBasics")]
    async fn process(&self, query: GetPoolBasics) -> Result<PoolBasicsRecord, sqlx::Error> {
        let basics = sqlx::query_as::<_, PoolBasicsRecord>(
            r#"
            SELECT
                COALESCE(SUM(asset_amount), 0)::BIGINT AS asset_depth,
                COALESCE(SUM(rune_amount), 0)::BIGINT AS rune_depth,
                COALESCE(SUM(units), 0)::BIGINT AS units,
                COALESCE(SUM(asset_amount) FILTER (WHERE event_type = 'stake'), 0)::BIGINT
                    AS asset_staked,
                COALESCE(SUM(rune_amount) FILTER (WHERE event_type = 'stake'), 0)::BIGINT
                    AS rune_staked,
                COALESCE(-SUM(asset_amount) FILTER (WHERE event_type = 'unstake'), 0)::BIGINT
                    AS asset_withdrawn,
                COALESCE(-SUM(rune_amount) FILTER (WHERE event_type = 'unstake'), 0)::BIGINT
                    AS rune_withdrawn,
                COALESCE(SUM(rune_amount)
                    FILTER (WHERE swap_direction = 'buy' AND rune_amount > 0), 0)::BIGINT
                    AS buy_volume,
                COALESCE(-SUM(rune_amount)
                    FILTER (WHERE swap_direction = 'sell' AND rune_amount < 0), 0)::BIGINT
                    AS sell_volume,
                COUNT(*) FILTER (WHERE swap_direction = 'buy' AND rune_amount > 0) AS buy_count,
                COUNT(*) FILTER (WHERE swap_direction = 'sell' AND asset_amount > 0) AS sell_count,
                COALESCE(SUM(rune_amount) FILTER (WHERE event_type = 'reward'), 0)::BIGINT
                    AS rewards,
                COALESCE(-SUM(asset_amount) FILTER (WHERE event_type = 'gas'), 0)::BIGINT
                    AS gas_used,
                COALESCE(SUM(rune_amount) FILTER (WHERE event_type = 'gas'), 0)::BIGINT
                    AS gas_replenished,
                (
                    SELECT latest.status
                    FROM pool_changes latest
                    WHERE latest.pool = $1
                      AND latest.status IS NOT NULL
                      AND ($2::BIGINT IS NULL OR latest.height <= $2)
                    ORDER BY latest.seq DESC
                    LIMIT 1
                ) AS status
            FROM pool_changes
            WHERE pool = $1 AND ($2::BIGINT IS NULL OR height <= $2)
            "#,
        )
        .bind(query.pool)
        .bind(query.at_height)
        .fetch_one(&self.pool)
        .await?;
        Ok(basics)
    }
}

#[derive(Debug, Clone)]
/// Deltas with `from <= time < to`, of one pool or of every pool.
pub struct GetPoolChangesInRange {
    pub pool: Option<String>,
    pub from: i64,
    pub to: i64,
}

impl Processor<GetPoolChangesInRange> for DatabaseProcessor {
    type Output = Vec<PoolChangeRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPoolChangesInRange")]
    async fn process(
        &self,
        query: GetPoolChangesInRange,
    ) -> Result<Vec<PoolChangeRecord>, sqlx::Error> {
        let changes = sqlx::query_as::<_, PoolChangeRecord>(
            r#"
            SELECT time, height, event_id, event_type, pool, asset_amount, rune_amount, units,
                   status, swap_direction, trade_slip, liquidity_fee
            FROM pool_changes
            WHERE ($1::TEXT IS NULL OR pool = $1) AND time >= $2 AND time < $3
            ORDER BY seq ASC
            "#,
        )
        .bind(query.pool)
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await?;
        Ok(changes)
    }
}

#[derive(Debug, Clone)]
/// Depth of a pool strictly before `before`.
pub struct GetOpeningDepth {
    pub pool: String,
    pub before: i64,
}

impl Processor<GetOpeningDepth> for DatabaseProcessor {
    type Output = OpeningDepth;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOpeningDepth")]
    async fn process(&self, query: GetOpeningDepth) -> Result<OpeningDepth, sqlx::Error> {
        let depth = sqlx::query_as::<_, OpeningDepth>(
            r#"
            SELECT COALESCE(SUM(asset_amount), 0)::BIGINT AS asset_depth,
                   COALESCE(SUM(rune_amount), 0)::BIGINT AS rune_depth,
                   COALESCE(SUM(units), 0)::BIGINT AS units
            FROM pool_changes
            WHERE pool = $1 AND time < $2
            "#,
        )
        .bind(query.pool)
        .bind(query.before)
        .fetch_one(&self.pool)
        .await?;
        Ok(depth)
    }
}

impl PoolChangeRecord {
    /// Insert many deltas in a single statement within a transaction.
    pub async fn insert_many_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        changes: &[PoolChange],
    ) -> Result<u64, sqlx::Error> {
        if changes.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO pool_changes \
            (time, height, event_id, event_type, pool, asset_amount, rune_amount, units, \
            status, swap_direction, trade_slip, liquidity_fee) ",
        );

        query_builder.push_values(changes, |mut b, change| {
            b.push_bind(change.time)
                .push_bind(change.height)
                .push_bind(change.event_id)
                .push_bind(change.event_type.as_str())
                .push_bind(change.pool.to_string())
                .push_bind(change.asset_amount)
                .push_bind(change.rune_amount)
                .push_bind(change.units)
                .push_bind(change.status.map(|status| status.as_str()))
                .push_bind(change.swap_direction.map(|direction| direction.as_str()))
                .push_bind(change.trade_slip)
                .push_bind(change.liquidity_fee);
        });

        let result = query_builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    /// Delete every delta at or above `height` within a transaction.
    pub async fn delete_from_height_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        height: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM pool_changes
            WHERE height >= $1
            "#,
        )
        .bind(height)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}
