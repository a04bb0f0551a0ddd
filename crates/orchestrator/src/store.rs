//! Transfer storage.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AccountId, EntryId, TransferId};
use domain::{Transfer, TransferState};
use outbox::{InMemoryOutboxStore, OutboxRecord};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::Result;

/// Outcome of the durable-record step.
#[derive(Debug)]
pub enum CreateOutcome {
    /// The transfer and its `TransferInitiated` event committed.
    Created,
    /// A concurrent sibling with the same idempotency key won the race;
    /// here is its row.
    DuplicateKey(Transfer),
}

/// Storage for the transfer saga.
///
/// Every mutation that emits an event couples the row update with the outbox
/// record in one transaction. Terminal transitions are keyed on the row not
/// yet being terminal, so a peer (request path vs. compensator) that lost the
/// race observes `false` and walks away.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Inserts the INITIATED row plus its outbox record. A unique violation
    /// on the idempotency key reloads and returns the winner.
    async fn create_initiated(
        &self,
        transfer: &Transfer,
        event: &OutboxRecord,
    ) -> Result<CreateOutcome>;

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>>;

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>>;

    /// Crosses the ledger-call boundary: state := LEDGER_CALLED,
    /// ledger_call_at := now. This is what makes the transfer visible to the
    /// compensator.
    async fn record_ledger_call(&self, id: TransferId) -> Result<()>;

    /// Terminal success: state := COMPLETED, ledger_entry_id set, event
    /// enqueued. Returns false (and writes nothing) if the row was already
    /// terminal.
    async fn record_ledger_success(
        &self,
        id: TransferId,
        entry_id: EntryId,
        event: &OutboxRecord,
    ) -> Result<bool>;

    /// Terminal failure: state := FAILED, failure_reason set, event
    /// enqueued. Returns false if the row was already terminal.
    async fn record_failure(
        &self,
        id: TransferId,
        reason: &str,
        event: &OutboxRecord,
    ) -> Result<bool>;

    /// Claims the transfer for recovery. A no-op unless the row is in
    /// LEDGER_CALLED.
    async fn mark_recovering(&self, id: TransferId) -> Result<()>;

    /// Recovery bookkeeping; allowed even on terminal rows.
    async fn increment_recovery_attempts(&self, id: TransferId) -> Result<()>;

    /// Non-terminal transfers whose ledger-call boundary was crossed before
    /// `cutoff`, oldest first.
    async fn stale_transfers(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>>;
}

/// PostgreSQL-backed transfer store.
#[derive(Clone)]
pub struct PostgresTransferStore {
    pool: PgPool,
}

impl PostgresTransferStore {
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

    fn row_to_transfer(row: PgRow) -> std::result::Result<Transfer, sqlx::Error> {
        let state: String = row.try_get("state")?;
        Ok(Transfer {
            id: TransferId::from_uuid(row.try_get::<Uuid, _>("id")?),
            from_account: AccountId::from_uuid(row.try_get::<Uuid, _>("from_account_id")?),
            to_account: AccountId::from_uuid(row.try_get::<Uuid, _>("to_account_id")?),
            amount_minor: row.try_get("amount_minor")?,
            currency: row.try_get("currency")?,
            idempotency_key: row.try_get("idempotency_key")?,
            state: TransferState::parse(&state).ok_or(sqlx::Error::RowNotFound)?,
            ledger_entry_id: row
                .try_get::<Option<Uuid>, _>("ledger_entry_id")?
                .map(EntryId::from_uuid),
            ledger_call_at: row.try_get("ledger_call_at")?,
            recovery_attempts: row.try_get("recovery_attempts")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_TRANSFER: &str = "SELECT id, from_account_id, to_account_id, amount_minor, currency, \
     idempotency_key, state, ledger_entry_id, ledger_call_at, recovery_attempts, failure_reason, \
     created_at, updated_at FROM transfers";

#[async_trait]
impl TransferStore for PostgresTransferStore {
    async fn create_initiated(
        &self,
        transfer: &Transfer,
        event: &OutboxRecord,
    ) -> Result<CreateOutcome> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            "INSERT INTO transfers (id, from_account_id, to_account_id, amount_minor, currency,
                 idempotency_key, state, recovery_attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $8)",
        )
        .bind(transfer.id.as_uuid())
        .bind(transfer.from_account.as_uuid())
        .bind(transfer.to_account.as_uuid())
        .bind(transfer.amount_minor)
        .bind(&transfer.currency)
        .bind(&transfer.idempotency_key)
        .bind(transfer.state.as_str())
        .bind(transfer.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(error) = insert {
            let unique = error
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            if unique {
                tx.rollback().await?;
                let winner = self
                    .get_by_idempotency_key(&transfer.idempotency_key)
                    .await?
                    .ok_or(OrchestratorError::Database(sqlx::Error::RowNotFound))?;
                return Ok(CreateOutcome::DuplicateKey(winner));
            }
            return Err(error.into());
        }

        outbox::enqueue(&mut *tx, event).await?;
        tx.commit().await?;
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!("{SELECT_TRANSFER} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_transfer).transpose().map_err(Into::into)
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>> {
        let row = sqlx::query(&format!("{SELECT_TRANSFER} WHERE idempotency_key = $1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_transfer).transpose().map_err(Into::into)
    }

    async fn record_ledger_call(&self, id: TransferId) -> Result<()> {
        sqlx::query(
            "UPDATE transfers SET state = 'LEDGER_CALLED', ledger_call_at = now(), updated_at = now()
             WHERE id = $1 AND state = 'INITIATED'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_ledger_success(
        &self,
        id: TransferId,
        entry_id: EntryId,
        event: &OutboxRecord,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transfers SET state = 'COMPLETED', ledger_entry_id = $2, updated_at = now()
             WHERE id = $1 AND state NOT IN ('COMPLETED', 'FAILED')",
        )
        .bind(id.as_uuid())
        .bind(entry_id.as_uuid())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        outbox::enqueue(&mut *tx, event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: TransferId,
        reason: &str,
        event: &OutboxRecord,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transfers SET state = 'FAILED', failure_reason = $2, updated_at = now()
             WHERE id = $1 AND state NOT IN ('COMPLETED', 'FAILED')",
        )
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        outbox::enqueue(&mut *tx, event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_recovering(&self, id: TransferId) -> Result<()> {
        sqlx::query(
            "UPDATE transfers SET state = 'RECOVERING', updated_at = now()
             WHERE id = $1 AND state = 'LEDGER_CALLED'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_recovery_attempts(&self, id: TransferId) -> Result<()> {
        sqlx::query(
            "UPDATE transfers SET recovery_attempts = recovery_attempts + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stale_transfers(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(&format!(
            "{SELECT_TRANSFER}
             WHERE state IN ('LEDGER_CALLED', 'RECOVERING')
               AND ledger_call_at IS NOT NULL
               AND ledger_call_at < $1
             ORDER BY ledger_call_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| Self::row_to_transfer(r).map_err(Into::into))
            .collect()
    }
}

/// In-memory transfer store for tests. Outbox records land in the shared
/// [`InMemoryOutboxStore`].
#[derive(Clone, Default)]
pub struct InMemoryTransferStore {
    transfers: Arc<Mutex<Vec<Transfer>>>,
    outbox: InMemoryOutboxStore,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    /// Test hook: rewrites a transfer row wholesale (e.g. to age its
    /// ledger_call_at past the staleness cutoff).
    pub fn put(&self, transfer: Transfer) {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(existing) = transfers.iter_mut().find(|t| t.id == transfer.id) {
            *existing = transfer;
        } else {
            transfers.push(transfer);
        }
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn create_initiated(
        &self,
        transfer: &Transfer,
        event: &OutboxRecord,
    ) -> Result<CreateOutcome> {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(winner) = transfers
            .iter()
            .find(|t| t.idempotency_key == transfer.idempotency_key)
        {
            return Ok(CreateOutcome::DuplicateKey(winner.clone()));
        }
        transfers.push(transfer.clone());
        self.outbox.enqueue(event.clone());
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Transfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.idempotency_key == key)
            .cloned())
    }

    async fn record_ledger_call(&self, id: TransferId) -> Result<()> {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(t) = transfers
            .iter_mut()
            .find(|t| t.id == id && t.state == TransferState::Initiated)
        {
            t.state = TransferState::LedgerCalled;
            t.ledger_call_at = Some(Utc::now());
            t.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_ledger_success(
        &self,
        id: TransferId,
        entry_id: EntryId,
        event: &OutboxRecord,
    ) -> Result<bool> {
        let mut transfers = self.transfers.lock().unwrap();
        let Some(t) = transfers
            .iter_mut()
            .find(|t| t.id == id && !t.state.is_terminal())
        else {
            return Ok(false);
        };
        t.state = TransferState::Completed;
        t.ledger_entry_id = Some(entry_id);
        t.updated_at = Utc::now();
        self.outbox.enqueue(event.clone());
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: TransferId,
        reason: &str,
        event: &OutboxRecord,
    ) -> Result<bool> {
        let mut transfers = self.transfers.lock().unwrap();
        let Some(t) = transfers
            .iter_mut()
            .find(|t| t.id == id && !t.state.is_terminal())
        else {
            return Ok(false);
        };
        t.state = TransferState::Failed;
        t.failure_reason = Some(reason.to_string());
        t.updated_at = Utc::now();
        self.outbox.enqueue(event.clone());
        Ok(true)
    }

    async fn mark_recovering(&self, id: TransferId) -> Result<()> {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(t) = transfers
            .iter_mut()
            .find(|t| t.id == id && t.state.can_mark_recovering())
        {
            t.state = TransferState::Recovering;
            t.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_recovery_attempts(&self, id: TransferId) -> Result<()> {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(t) = transfers.iter_mut().find(|t| t.id == id) {
            t.recovery_attempts += 1;
            t.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn stale_transfers(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transfer>> {
        let transfers = self.transfers.lock().unwrap();
        let mut stale: Vec<Transfer> = transfers
            .iter()
            .filter(|t| {
                matches!(
                    t.state,
                    TransferState::LedgerCalled | TransferState::Recovering
                ) && t.ledger_call_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.ledger_call_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}
