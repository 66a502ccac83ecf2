use crate::entities::EventStatusName;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use poolscan_sdk::objects::{DomainEvent, Event, Fee, Tx};
use sqlx::types::Json;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EventRecord {
    pub chain: String,
    pub id: i64,
    pub height: i64,
    pub time: i64,
    pub status: EventStatusName,
    pub in_tx: Json<Tx>,
    pub out_txs: Json<Vec<Tx>>,
    pub fee: Json<Fee>,
    pub payload: Json<DomainEvent>,
}

impl From<EventRecord> for Event {
    fn from(record: EventRecord) -> Self {
        Event {
            id: record.id,
            chain: record.chain.into(),
            height: record.height,
            time: record.time,
            status: record.status.into(),
            in_tx: record.in_tx.0,
            out_txs: record.out_txs.0,
            fee: record.fee.0,
            payload: record.payload.0,
        }
    }
}

#[derive(Debug, Clone)]
/// Highest stored event id of a chain, 0 when the chain has none.
pub struct GetMaxEventId {
    pub chain: String,
}

impl Processor<GetMaxEventId> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMaxEventId")]
    async fn process(&self, query: GetMaxEventId) -> Result<i64, sqlx::Error> {
        let max_id: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(id), 0)::BIGINT
            FROM events
            WHERE chain = $1
            "#,
        )
        .bind(query.chain)
        .fetch_one(&self.pool)
        .await?;
        Ok(max_id)
    }
}

#[derive(Debug, Clone)]
/// Highest height of any stored event of a chain, 0 when the chain has none.
pub struct GetMaxHeight {
    pub chain: String,
}

impl Processor<GetMaxHeight> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMaxHeight")]
    async fn process(&self, query: GetMaxHeight) -> Result<i64, sqlx::Error> {
        let max_height: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(height), 0)::BIGINT
            FROM events
            WHERE chain = $1
            "#,
        )
        .bind(query.chain)
        .fetch_one(&self.pool)
        .await?;
        Ok(max_height)
    }
}

#[derive(Debug, Clone)]
/// Events whose inbound tx is `tx_id`, ascending by id.
pub struct GetEventsByTxId {
    pub tx_id: String,
}

impl Processor<GetEventsByTxId> for DatabaseProcessor {
    type Output = Vec<EventRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEventsByTxId")]
    async fn process(&self, query: GetEventsByTxId) -> Result<Vec<EventRecord>, sqlx::Error> {
        let events = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT chain, id, height, time, status, in_tx, out_txs, fee, payload
            FROM events
            WHERE in_tx_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(query.tx_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

#[derive(Debug, Clone)]
/// Current status of one event, `None` when it is not stored.
pub struct GetEventStatus {
    pub chain: String,
    pub id: i64,
}

impl Processor<GetEventStatus> for DatabaseProcessor {
    type Output = Option<EventStatusName>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetEventStatus")]
    async fn process(&self, query: GetEventStatus) -> Result<Option<EventStatusName>, sqlx::Error> {
        let status = sqlx::query_scalar(
            r#"
            SELECT status
            FROM events
            WHERE chain = $1 AND id = $2
            "#,
        )
        .bind(query.chain)
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }
}

#[derive(Debug, Clone)]
/// Overwrite status, fee and out txs of an event.
///
/// Never moves a `success` row back to `pending`; returns the number of rows
/// updated.
pub struct UpdateEvent {
    pub chain: String,
    pub id: i64,
    pub status: EventStatusName,
    pub fee: Fee,
    pub out_txs: Vec<Tx>,
}

impl Processor<UpdateEvent> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateEvent")]
    async fn process(&self, update: UpdateEvent) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = $3, fee = $4, out_txs = $5
            WHERE chain = $1 AND id = $2
              AND NOT (status = 'success' AND $3 = 'pending'::event_status)
            "#,
        )
        .bind(update.chain)
        .bind(update.id)
        .bind(update.status)
        .bind(Json(update.fee))
        .bind(Json(update.out_txs))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Set the status of an event, refusing `success -> pending`.
pub struct UpdateEventStatus {
    pub chain: String,
    pub id: i64,
    pub status: EventStatusName,
}

impl Processor<UpdateEventStatus> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateEventStatus")]
    async fn process(&self, update: UpdateEventStatus) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET status = $3
            WHERE chain = $1 AND id = $2
              AND NOT (status = 'success' AND $3 = 'pending'::event_status)
            "#,
        )
        .bind(update.chain)
        .bind(update.id)
        .bind(update.status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl EventRecord {
    /// Insert an event within a transaction. Returns `false` when
    /// `(chain, id)` already exists.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &Event,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO events
                (chain, id, height, time, event_type, status, in_tx_id, in_tx, out_txs, fee, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (chain, id) DO NOTHING
            "#,
        )
        .bind(event.chain.as_str())
        .bind(event.id)
        .bind(event.height)
        .bind(event.time)
        .bind(event.event_type().as_str())
        .bind(EventStatusName::from(event.status))
        .bind(event.in_tx.id.as_str())
        .bind(Json(&event.in_tx))
        .bind(Json(&event.out_txs))
        .bind(Json(&event.fee))
        .bind(Json(&event.payload))
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Append `out_tx` to an event's out txs within a transaction, unless it
    /// is already there. The row lock serializes concurrent settlements of
    /// the same event. Returns the updated row.
    pub async fn settle_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        chain: &str,
        id: i64,
        out_tx: &Tx,
        expected: i32,
    ) -> Result<Option<EventRecord>, sqlx::Error> {
        sqlx::query_as::<_, EventRecord>(
            r#"
            UPDATE events
            SET out_txs = out_txs || jsonb_build_array($3::jsonb),
                status = CASE
                    WHEN jsonb_array_length(out_txs) + 1 >= $4 THEN 'success'::event_status
                    ELSE status
                END
            WHERE chain = $1 AND id = $2
              AND NOT out_txs @> jsonb_build_array($3::jsonb)
            RETURNING chain, id, height, time, status, in_tx, out_txs, fee, payload
            "#,
        )
        .bind(chain)
        .bind(id)
        .bind(Json(out_tx))
        .bind(expected)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Set an event's fee within a transaction unless it already carries it.
    pub async fn charge_fee_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        chain: &str,
        id: i64,
        fee: &Fee,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET fee = $3
            WHERE chain = $1 AND id = $2 AND fee <> $3
            "#,
        )
        .bind(chain)
        .bind(id)
        .bind(Json(fee))
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete every event at or above `height` within a transaction.
    pub async fn delete_from_height_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        height: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE height >= $1
            "#,
        )
        .bind(height)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}
