//! PostgreSQL-backed outbox store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::record::OutboxRecord;
use crate::store::{OutboxBatch, OutboxStore};
use crate::Result;

/// Inserts an outbox record on the caller's connection.
///
/// Callers must pass the transaction that mutates the record's aggregate;
/// inserting outside that transaction breaks the outbox contract.
pub async fn enqueue(conn: &mut PgConnection, record: &OutboxRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload, headers, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(record.id.as_uuid())
    .bind(&record.aggregate_type)
    .bind(record.aggregate_id)
    .bind(&record.event_type)
    .bind(&record.payload)
    .bind(Json(&record.headers))
    .bind(record.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Outbox store backed by the writer service's own Postgres database.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> std::result::Result<OutboxRecord, sqlx::Error> {
        let Json(headers): Json<HashMap<String, String>> = row.try_get("headers")?;
        Ok(OutboxRecord {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            headers,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn begin_batch(&self, limit: i64) -> Result<Box<dyn OutboxBatch>> {
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED lets N relay workers drain the same table without
        // coordination; created_at alone is not monotonic at millisecond
        // resolution, so id breaks ties.
        let rows = sqlx::query(
            "SELECT id, aggregate_type, aggregate_id, event_type, payload, headers, created_at, sent_at
             FROM outbox
             WHERE sent_at IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let records = rows
            .into_iter()
            .map(Self::row_to_record)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Box::new(PostgresOutboxBatch { tx, records }))
    }

    async fn purge_sent(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM outbox WHERE sent_at IS NOT NULL AND sent_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

struct PostgresOutboxBatch {
    tx: Transaction<'static, Postgres>,
    records: Vec<OutboxRecord>,
}

#[async_trait]
impl OutboxBatch for PostgresOutboxBatch {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn mark_sent(&mut self, id: EventId) -> Result<()> {
        sqlx::query("UPDATE outbox SET sent_at = now() WHERE id = $1 AND sent_at IS NULL")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
