//! Journal entry storage.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{AccountId, EntryId, TransferId};
use domain::{Entry, Line, Side};
use outbox::{InMemoryOutboxStore, OutboxRecord};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::JournalError;
use crate::Result;

/// Outcome of an entry insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// The entry (and its outbox event) were committed.
    Inserted,
    /// A live entry already exists for the batch; nothing was written.
    Duplicate { entry_id: EntryId },
}

/// What the reconciliation oracle returns for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLookup {
    pub entry_id: EntryId,
    pub batch_id: TransferId,
    pub voided: bool,
}

/// Storage for journal entries.
///
/// `insert_entry` and `void_entry` couple the state change with its outbox
/// record in one atomic unit; that coupling is the outbox contract.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Inserts the entry, its lines, and the outbox record atomically.
    /// Returns `Duplicate` when a live entry already holds the batch id.
    async fn insert_entry(&self, entry: &Entry, event: &OutboxRecord) -> Result<PostOutcome>;

    /// Loads a full entry by id.
    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<Entry>>;

    /// The reconciliation oracle: the original entry for a batch, oldest
    /// first, with its voided flag.
    async fn get_entry_by_batch(&self, batch_id: TransferId) -> Result<Option<BatchLookup>>;

    /// Flags the original entry voided and inserts the compensating entry
    /// plus its outbox record, all atomically.
    async fn void_entry(&self, original: EntryId, void: &Entry, event: &OutboxRecord)
        -> Result<()>;
}

/// PostgreSQL-backed journal store.
#[derive(Clone)]
pub struct PostgresJournalStore {
    pool: PgPool,
}

impl PostgresJournalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn insert_lines(
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        entry: &Entry,
    ) -> std::result::Result<(), sqlx::Error> {
        for line in &entry.lines {
            sqlx::query(
                "INSERT INTO journal_lines (entry_id, account_id, amount_minor, side)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(entry.entry_id.as_uuid())
            .bind(line.account_id.as_uuid())
            .bind(line.amount_minor)
            .bind(line.side.as_str())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JournalStore for PostgresJournalStore {
    async fn insert_entry(&self, entry: &Entry, event: &OutboxRecord) -> Result<PostOutcome> {
        let mut tx = self.pool.begin().await?;

        // The partial unique index on (batch_id) WHERE NOT voided arbitrates
        // concurrent posts of the same batch; the loser sees zero rows.
        let inserted = sqlx::query(
            "INSERT INTO journal_entries (entry_id, batch_id, currency, ts, voided)
             VALUES ($1, $2, $3, $4, FALSE)
             ON CONFLICT (batch_id) WHERE NOT voided DO NOTHING",
        )
        .bind(entry.entry_id.as_uuid())
        .bind(entry.batch_id.as_uuid())
        .bind(&entry.currency)
        .bind(entry.timestamp)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            let existing = self
                .get_entry_by_batch(entry.batch_id)
                .await?
                .ok_or(JournalError::Database(sqlx::Error::RowNotFound))?;
            return Ok(PostOutcome::Duplicate {
                entry_id: existing.entry_id,
            });
        }

        Self::insert_lines(&mut tx, entry).await?;
        outbox::enqueue(&mut *tx, event).await?;
        tx.commit().await?;

        Ok(PostOutcome::Inserted)
    }

    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<Entry>> {
        let row = sqlx::query(
            "SELECT entry_id, batch_id, currency, ts, voided FROM journal_entries WHERE entry_id = $1",
        )
        .bind(entry_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            "SELECT account_id, amount_minor, side FROM journal_lines WHERE entry_id = $1 ORDER BY id",
        )
        .bind(entry_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let lines = line_rows
            .into_iter()
            .map(|l| {
                let side: String = l.try_get("side")?;
                Ok(Line {
                    account_id: AccountId::from_uuid(l.try_get::<Uuid, _>("account_id")?),
                    amount_minor: l.try_get("amount_minor")?,
                    side: Side::parse(&side).ok_or(sqlx::Error::RowNotFound)?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(Entry {
            entry_id: EntryId::from_uuid(row.try_get::<Uuid, _>("entry_id")?),
            batch_id: TransferId::from_uuid(row.try_get::<Uuid, _>("batch_id")?),
            currency: row.try_get("currency")?,
            lines,
            timestamp: row.try_get("ts")?,
            voided: row.try_get("voided")?,
        }))
    }

    async fn get_entry_by_batch(&self, batch_id: TransferId) -> Result<Option<BatchLookup>> {
        let row = sqlx::query(
            "SELECT entry_id, batch_id, voided FROM journal_entries
             WHERE batch_id = $1
             ORDER BY ts ASC, entry_id ASC
             LIMIT 1",
        )
        .bind(batch_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(BatchLookup {
                entry_id: EntryId::from_uuid(row.try_get::<Uuid, _>("entry_id")?),
                batch_id: TransferId::from_uuid(row.try_get::<Uuid, _>("batch_id")?),
                voided: row.try_get("voided")?,
            }),
            None => None,
        })
    }

    async fn void_entry(
        &self,
        original: EntryId,
        void: &Entry,
        event: &OutboxRecord,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE journal_entries SET voided = TRUE WHERE entry_id = $1 AND NOT voided",
        )
        .bind(original.as_uuid())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            let exists =
                sqlx::query("SELECT 1 AS one FROM journal_entries WHERE entry_id = $1")
                    .bind(original.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
            return Err(if exists {
                JournalError::AlreadyVoided(original)
            } else {
                JournalError::NotFound(original)
            });
        }

        sqlx::query(
            "INSERT INTO journal_entries (entry_id, batch_id, currency, ts, voided)
             VALUES ($1, $2, $3, $4, FALSE)",
        )
        .bind(void.entry_id.as_uuid())
        .bind(void.batch_id.as_uuid())
        .bind(&void.currency)
        .bind(void.timestamp)
        .execute(&mut *tx)
        .await?;

        Self::insert_lines(&mut tx, void).await?;
        outbox::enqueue(&mut *tx, event).await?;
        tx.commit().await?;

        Ok(())
    }
}

/// In-memory journal store for tests. Outbox records land in the shared
/// [`InMemoryOutboxStore`] so a relay can be driven over them.
#[derive(Clone, Default)]
pub struct InMemoryJournalStore {
    entries: Arc<Mutex<Vec<Entry>>>,
    outbox: InMemoryOutboxStore,
}

impl InMemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outbox records written alongside entries.
    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl JournalStore for InMemoryJournalStore {
    async fn insert_entry(&self, entry: &Entry, event: &OutboxRecord) -> Result<PostOutcome> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries
            .iter()
            .find(|e| e.batch_id == entry.batch_id && !e.voided)
        {
            return Ok(PostOutcome::Duplicate {
                entry_id: existing.entry_id,
            });
        }
        entries.push(entry.clone());
        self.outbox.enqueue(event.clone());
        Ok(PostOutcome::Inserted)
    }

    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<Entry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.entry_id == entry_id)
            .cloned())
    }

    async fn get_entry_by_batch(&self, batch_id: TransferId) -> Result<Option<BatchLookup>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .min_by_key(|e| e.timestamp)
            .map(|e| BatchLookup {
                entry_id: e.entry_id,
                batch_id: e.batch_id,
                voided: e.voided,
            }))
    }

    async fn void_entry(
        &self,
        original: EntryId,
        void: &Entry,
        event: &OutboxRecord,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let Some(existing) = entries.iter_mut().find(|e| e.entry_id == original) else {
            return Err(JournalError::NotFound(original));
        };
        if existing.voided {
            return Err(JournalError::AlreadyVoided(original));
        }
        existing.voided = true;
        entries.push(void.clone());
        self.outbox.enqueue(event.clone());
        Ok(())
    }
}
