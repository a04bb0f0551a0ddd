//! Read-model storage.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AccountId, EntryId, EventId, TransferId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::Result;

/// One balance adjustment derived from an `EntryPosted` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: AccountId,
    pub currency: String,
    /// Signed, holder-oriented: negative for DEBIT, positive for CREDIT.
    pub delta_minor: i64,
}

/// One statement row derived from an `EntryPosted` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRow {
    pub account_id: AccountId,
    pub entry_id: EntryId,
    pub amount_minor: i64,
    pub side: String,
    pub ts: DateTime<Utc>,
}

/// The full fold of one `EntryPosted` event.
#[derive(Debug, Clone, Default)]
pub struct EntryFold {
    pub deltas: Vec<BalanceDelta>,
    pub statements: Vec<StatementRow>,
}

/// A transfer as seen by the read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferViewRow {
    pub id: TransferId,
    pub from_account: Option<AccountId>,
    pub to_account: Option<AccountId>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
}

/// A materialized balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub account_id: AccountId,
    pub currency: String,
    pub balance_minor: i64,
    pub updated_at: DateTime<Utc>,
}

/// Read-model storage.
///
/// Every `apply_*` method writes the projection and the event-id dedup row
/// in one transaction and returns false — writing nothing — when the event
/// was already applied. That single contract is what turns at-least-once
/// delivery into effectively-exactly-once projection.
#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Folds an `EntryPosted` event: balance upserts plus statement appends.
    async fn apply_entry(&self, event_id: EventId, fold: &EntryFold) -> Result<bool>;

    /// Inserts the read-side transfer row (INITIATED). Never downgrades an
    /// existing row's status; fills in details a terminal event could not
    /// carry.
    async fn apply_transfer_initiated(
        &self,
        event_id: EventId,
        row: &TransferViewRow,
    ) -> Result<bool>;

    /// Applies a terminal status. Upserts on id so a terminal event arriving
    /// before its INITIATED sibling still lands; the first terminal status
    /// wins.
    async fn apply_transfer_status(
        &self,
        event_id: EventId,
        id: TransferId,
        status: &str,
        failure_reason: Option<&str>,
    ) -> Result<bool>;

    async fn get_balance(
        &self,
        account_id: AccountId,
        currency: Option<&str>,
    ) -> Result<Option<Balance>>;

    async fn list_statements(
        &self,
        account_id: AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatementRow>>;

    async fn get_transfer(&self, id: TransferId) -> Result<Option<TransferViewRow>>;
}

const TERMINAL_STATUSES: [&str; 2] = ["COMPLETED", "FAILED"];

/// PostgreSQL-backed read store.
#[derive(Clone)]
pub struct PostgresReadStore {
    pool: PgPool,
}

impl PostgresReadStore {
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

    /// Claims the event id inside `tx`. Zero rows means a previous delivery
    /// already applied this event.
    async fn claim_event(
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        event_id: EventId,
    ) -> std::result::Result<bool, sqlx::Error> {
        let claimed = sqlx::query(
            "INSERT INTO processed_events (event_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(event_id.as_uuid())
        .execute(&mut **tx)
        .await?
        .rows_affected();
        Ok(claimed == 1)
    }
}

#[async_trait]
impl ReadStore for PostgresReadStore {
    async fn apply_entry(&self, event_id: EventId, fold: &EntryFold) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !Self::claim_event(&mut tx, event_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        for delta in &fold.deltas {
            sqlx::query(
                "INSERT INTO balances (account_id, currency, balance_minor, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (account_id, currency)
                 DO UPDATE SET balance_minor = balances.balance_minor + EXCLUDED.balance_minor,
                               updated_at = now()",
            )
            .bind(delta.account_id.as_uuid())
            .bind(&delta.currency)
            .bind(delta.delta_minor)
            .execute(&mut *tx)
            .await?;
        }

        for statement in &fold.statements {
            sqlx::query(
                "INSERT INTO statements (account_id, entry_id, amount_minor, side, ts)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(statement.account_id.as_uuid())
            .bind(statement.entry_id.as_uuid())
            .bind(statement.amount_minor)
            .bind(&statement.side)
            .bind(statement.ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn apply_transfer_initiated(
        &self,
        event_id: EventId,
        row: &TransferViewRow,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !Self::claim_event(&mut tx, event_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        // A terminal event may already have created the row; fill details,
        // keep its status.
        sqlx::query(
            "INSERT INTO transfers_view (id, from_account_id, to_account_id, amount_minor, currency, status, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (id)
             DO UPDATE SET from_account_id = EXCLUDED.from_account_id,
                           to_account_id = EXCLUDED.to_account_id,
                           amount_minor = EXCLUDED.amount_minor,
                           currency = EXCLUDED.currency,
                           updated_at = now()",
        )
        .bind(row.id.as_uuid())
        .bind(row.from_account.map(|a| a.as_uuid()))
        .bind(row.to_account.map(|a| a.as_uuid()))
        .bind(row.amount_minor)
        .bind(&row.currency)
        .bind(&row.status)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn apply_transfer_status(
        &self,
        event_id: EventId,
        id: TransferId,
        status: &str,
        failure_reason: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !Self::claim_event(&mut tx, event_id).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO transfers_view (id, status, failure_reason, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (id)
             DO UPDATE SET status = EXCLUDED.status,
                           failure_reason = EXCLUDED.failure_reason,
                           updated_at = now()
             WHERE transfers_view.status NOT IN ('COMPLETED', 'FAILED')",
        )
        .bind(id.as_uuid())
        .bind(status)
        .bind(failure_reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_balance(
        &self,
        account_id: AccountId,
        currency: Option<&str>,
    ) -> Result<Option<Balance>> {
        let row = match currency {
            Some(currency) => {
                sqlx::query(
                    "SELECT account_id, currency, balance_minor, updated_at FROM balances
                     WHERE account_id = $1 AND currency = $2",
                )
                .bind(account_id.as_uuid())
                .bind(currency)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT account_id, currency, balance_minor, updated_at FROM balances
                     WHERE account_id = $1 ORDER BY currency LIMIT 1",
                )
                .bind(account_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(match row {
            Some(row) => Some(Balance {
                account_id: AccountId::from_uuid(row.try_get::<Uuid, _>("account_id")?),
                currency: row.try_get("currency")?,
                balance_minor: row.try_get("balance_minor")?,
                updated_at: row.try_get("updated_at")?,
            }),
            None => None,
        })
    }

    async fn list_statements(
        &self,
        account_id: AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatementRow>> {
        let rows = sqlx::query(
            "SELECT account_id, entry_id, amount_minor, side, ts FROM statements
             WHERE account_id = $1
               AND ($2::timestamptz IS NULL OR ts >= $2)
               AND ($3::timestamptz IS NULL OR ts <= $3)
             ORDER BY ts ASC, id ASC
             LIMIT 500",
        )
        .bind(account_id.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StatementRow {
                    account_id: AccountId::from_uuid(row.try_get::<Uuid, _>("account_id")?),
                    entry_id: EntryId::from_uuid(row.try_get::<Uuid, _>("entry_id")?),
                    amount_minor: row.try_get("amount_minor")?,
                    side: row.try_get("side")?,
                    ts: row.try_get("ts")?,
                })
            })
            .collect()
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<TransferViewRow>> {
        let row = sqlx::query(
            "SELECT id, from_account_id, to_account_id, amount_minor, currency, status, failure_reason
             FROM transfers_view WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(TransferViewRow {
                id: TransferId::from_uuid(row.try_get::<Uuid, _>("id")?),
                from_account: row
                    .try_get::<Option<Uuid>, _>("from_account_id")?
                    .map(AccountId::from_uuid),
                to_account: row
                    .try_get::<Option<Uuid>, _>("to_account_id")?
                    .map(AccountId::from_uuid),
                amount_minor: row.try_get("amount_minor")?,
                currency: row.try_get("currency")?,
                status: row.try_get("status")?,
                failure_reason: row.try_get("failure_reason")?,
            }),
            None => None,
        })
    }
}

/// In-memory read store for tests.
#[derive(Clone, Default)]
pub struct InMemoryReadStore {
    inner: Arc<Mutex<InMemoryState>>,
}

#[derive(Default)]
struct InMemoryState {
    processed: HashSet<EventId>,
    balances: HashMap<(AccountId, String), i64>,
    statements: Vec<StatementRow>,
    transfers: HashMap<TransferId, TransferViewRow>,
}

impl InMemoryReadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all balances, for zero-sum assertions.
    pub fn total_balance(&self) -> i64 {
        self.inner.lock().unwrap().balances.values().sum()
    }

    pub fn statement_count(&self) -> usize {
        self.inner.lock().unwrap().statements.len()
    }
}

#[async_trait]
impl ReadStore for InMemoryReadStore {
    async fn apply_entry(&self, event_id: EventId, fold: &EntryFold) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.processed.insert(event_id) {
            return Ok(false);
        }
        for delta in &fold.deltas {
            *inner
                .balances
                .entry((delta.account_id, delta.currency.clone()))
                .or_insert(0) += delta.delta_minor;
        }
        inner.statements.extend(fold.statements.iter().cloned());
        Ok(true)
    }

    async fn apply_transfer_initiated(
        &self,
        event_id: EventId,
        row: &TransferViewRow,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.processed.insert(event_id) {
            return Ok(false);
        }
        inner
            .transfers
            .entry(row.id)
            .and_modify(|existing| {
                existing.from_account = row.from_account;
                existing.to_account = row.to_account;
                existing.amount_minor = row.amount_minor;
                existing.currency = row.currency.clone();
            })
            .or_insert_with(|| row.clone());
        Ok(true)
    }

    async fn apply_transfer_status(
        &self,
        event_id: EventId,
        id: TransferId,
        status: &str,
        failure_reason: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.processed.insert(event_id) {
            return Ok(false);
        }
        let entry = inner.transfers.entry(id).or_insert_with(|| TransferViewRow {
            id,
            from_account: None,
            to_account: None,
            amount_minor: None,
            currency: None,
            status: status.to_string(),
            failure_reason: failure_reason.map(String::from),
        });
        if !TERMINAL_STATUSES.contains(&entry.status.as_str()) || entry.status == status {
            entry.status = status.to_string();
            entry.failure_reason = failure_reason.map(String::from);
        }
        Ok(true)
    }

    async fn get_balance(
        &self,
        account_id: AccountId,
        currency: Option<&str>,
    ) -> Result<Option<Balance>> {
        let inner = self.inner.lock().unwrap();
        let found = inner
            .balances
            .iter()
            .filter(|((account, c), _)| {
                *account == account_id && currency.map(|want| want == c).unwrap_or(true)
            })
            .min_by(|a, b| a.0 .1.cmp(&b.0 .1));
        Ok(found.map(|((account, currency), balance)| Balance {
            account_id: *account,
            currency: currency.clone(),
            balance_minor: *balance,
            updated_at: Utc::now(),
        }))
    }

    async fn list_statements(
        &self,
        account_id: AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<StatementRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .statements
            .iter()
            .filter(|s| {
                s.account_id == account_id
                    && from.map(|f| s.ts >= f).unwrap_or(true)
                    && to.map(|t| s.ts <= t).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<TransferViewRow>> {
        Ok(self.inner.lock().unwrap().transfers.get(&id).cloned())
    }
}
