//! Client side of the journal service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{EntryId, TransferId};
use domain::Transfer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the journal call, classified for the saga.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// The journal definitively rejected the entry (4xx). Retrying cannot
    /// help; the saga fails.
    #[error("journal rejected entry ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport failure, timeout, or journal 5xx. Retryable; if retries
    /// exhaust, the outcome is ambiguous and the compensator owns it.
    #[error("journal unavailable: {0}")]
    Unavailable(String),

    /// The process-local circuit breaker short-circuited the call.
    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl LedgerError {
    /// True when retrying cannot change the outcome.
    pub fn is_definitive(&self) -> bool {
        matches!(self, LedgerError::Rejected { .. })
    }
}

/// What the saga and the compensator need from the journal.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Posts the transfer's double entry (batch id = transfer id, DEBIT the
    /// source, CREDIT the destination) and returns the journal entry id.
    async fn post_entry(&self, transfer: &Transfer) -> Result<EntryId, LedgerError>;

    /// The reconciliation oracle: the entry for a batch, if one exists.
    /// `Ok(None)` means the journal definitively has no entry.
    async fn entry_by_batch(&self, batch_id: TransferId) -> Result<Option<EntryId>, LedgerError>;
}

#[derive(Serialize)]
struct EntryRequest {
    batch_id: String,
    currency: String,
    lines: Vec<LineRequest>,
}

#[derive(Serialize)]
struct LineRequest {
    account_id: String,
    amount_minor: i64,
    side: &'static str,
}

#[derive(Deserialize)]
struct EntryResponse {
    entry_id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
}

/// HTTP client for the journal service.
#[derive(Clone)]
pub struct HttpLedgerGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLedgerGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn post_entry(&self, transfer: &Transfer) -> Result<EntryId, LedgerError> {
        let request = EntryRequest {
            batch_id: transfer.batch_id().to_string(),
            currency: transfer.currency.clone(),
            lines: vec![
                LineRequest {
                    account_id: transfer.from_account.to_string(),
                    amount_minor: transfer.amount_minor,
                    side: "DEBIT",
                },
                LineRequest {
                    account_id: transfer.to_account.to_string(),
                    amount_minor: transfer.amount_minor,
                    side: "CREDIT",
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/entries", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: EntryResponse = response
                .json()
                .await
                .map_err(|e| LedgerError::Unavailable(format!("bad response body: {e}")))?;
            return body
                .entry_id
                .parse()
                .map(EntryId::from_uuid)
                .map_err(|e| LedgerError::Unavailable(format!("bad entry_id: {e}")));
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_default();

        if status.is_client_error() {
            Err(LedgerError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(LedgerError::Unavailable(format!(
                "journal returned {status}: {message}"
            )))
        }
    }

    async fn entry_by_batch(&self, batch_id: TransferId) -> Result<Option<EntryId>, LedgerError> {
        let response = self
            .client
            .get(format!("{}/v1/entries/by-batch/{batch_id}", self.base_url))
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: EntryResponse = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::Unavailable(format!("bad response body: {e}")))?;
                body.entry_id
                    .parse()
                    .map(|u| Some(EntryId::from_uuid(u)))
                    .map_err(|e| LedgerError::Unavailable(format!("bad entry_id: {e}")))
            }
            status => Err(LedgerError::Unavailable(format!(
                "journal returned {status}"
            ))),
        }
    }
}

/// Scriptable in-memory journal for tests.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Mutex<LedgerState>>,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<TransferId, EntryId>,
    mode: LedgerMode,
    post_calls: u32,
    lookup_calls: u32,
}

#[derive(Default, Clone)]
enum LedgerMode {
    #[default]
    Succeed,
    Reject {
        status: u16,
        message: String,
    },
    Unavailable,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal accepts posts (the default).
    pub fn succeed(&self) {
        self.inner.lock().unwrap().mode = LedgerMode::Succeed;
    }

    /// Journal answers every call with a definitive 4xx.
    pub fn reject(&self, status: u16, message: impl Into<String>) {
        self.inner.lock().unwrap().mode = LedgerMode::Reject {
            status,
            message: message.into(),
        };
    }

    /// Journal is unreachable.
    pub fn set_unreachable(&self) {
        self.inner.lock().unwrap().mode = LedgerMode::Unavailable;
    }

    /// Seeds an existing entry, as if a previous post committed.
    pub fn seed_entry(&self, batch_id: TransferId, entry_id: EntryId) {
        self.inner.lock().unwrap().entries.insert(batch_id, entry_id);
    }

    pub fn post_calls(&self) -> u32 {
        self.inner.lock().unwrap().post_calls
    }

    pub fn lookup_calls(&self) -> u32 {
        self.inner.lock().unwrap().lookup_calls
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn post_entry(&self, transfer: &Transfer) -> Result<EntryId, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.post_calls += 1;
        match inner.mode.clone() {
            LedgerMode::Succeed => {
                let entry_id = *inner
                    .entries
                    .entry(transfer.batch_id())
                    .or_insert_with(EntryId::new);
                Ok(entry_id)
            }
            LedgerMode::Reject { status, message } => {
                Err(LedgerError::Rejected { status, message })
            }
            LedgerMode::Unavailable => {
                Err(LedgerError::Unavailable("connection refused".to_string()))
            }
        }
    }

    async fn entry_by_batch(&self, batch_id: TransferId) -> Result<Option<EntryId>, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookup_calls += 1;
        match inner.mode {
            LedgerMode::Unavailable => {
                Err(LedgerError::Unavailable("connection refused".to_string()))
            }
            _ => Ok(inner.entries.get(&batch_id).copied()),
        }
    }
}
