//! The transfer saga executor.

use std::sync::Arc;

use common::AccountId;
use domain::Transfer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::events;
use crate::idem::{IdemGuard, CLAIM_TTL};
use crate::ledger::{LedgerError, LedgerGateway};
use crate::resilience::{retry, CircuitBreaker, RetryConfig};
use crate::store::{CreateOutcome, TransferStore};
use crate::Result;

/// A transfer request, validated into a [`Transfer`] by the executor.
#[derive(Debug, Clone)]
pub struct CreateTransfer {
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount_minor: i64,
    pub currency: String,
    pub idempotency_key: String,
}

/// Drives a transfer through its saga: durable INITIATED record, the
/// guarded synchronous journal call, and the terminal transition.
///
/// Guarantees: at most one transfer row per idempotency key; the returned
/// row reflects the most recent durable state; an accepted transfer reaches
/// a terminal state without operator action (the compensator finishes what
/// a crash or an ambiguous journal call left behind).
pub struct SagaExecutor<S, L, G> {
    store: S,
    ledger: L,
    guard: G,
    breaker: Arc<CircuitBreaker>,
    retry_config: RetryConfig,
}

impl<S, L, G> SagaExecutor<S, L, G>
where
    S: TransferStore,
    L: LedgerGateway,
    G: IdemGuard,
{
    pub fn new(store: S, ledger: L, guard: G, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            store,
            ledger,
            guard,
            breaker,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Executes the saga for one request and returns the transfer's durable
    /// state. Ambiguous journal outcomes leave the row in LEDGER_CALLED for
    /// the compensator; callers surface that as "accepted, pending".
    #[tracing::instrument(skip(self, cmd, cancel), fields(idempotency_key = %cmd.idempotency_key))]
    pub async fn execute(
        &self,
        cmd: CreateTransfer,
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        metrics::counter!("transfers_requested").increment(1);

        // 1. Authoritative idempotency check: a known key returns its
        //    transfer untouched, whatever the new payload says.
        if let Some(existing) = self
            .store
            .get_by_idempotency_key(&cmd.idempotency_key)
            .await?
        {
            info!(transfer_id = %existing.id, "idempotent replay");
            metrics::counter!("transfers_idempotent_replays").increment(1);
            return Ok(existing);
        }

        // 2. Advisory cache claim. Unavailable cache means "proceed, trust
        //    the database"; a lost claim means a sibling is in flight.
        let claim_key = format!("transfer:{}", cmd.idempotency_key);
        match self.guard.claim(&claim_key, CLAIM_TTL).await {
            Ok(true) => {}
            Ok(false) => return Err(OrchestratorError::DuplicateInFlight),
            Err(error) => {
                warn!(%error, "idempotency cache unavailable, continuing with database fallback");
            }
        }

        // 3. Durable record: INITIATED row + TransferInitiated event, one
        //    transaction. A unique violation means a sibling won the race.
        let transfer = Transfer::new(
            cmd.from_account,
            cmd.to_account,
            cmd.amount_minor,
            cmd.currency,
            cmd.idempotency_key,
        )?;
        let initiated = events::transfer_initiated(&transfer);
        match self.store.create_initiated(&transfer, &initiated).await? {
            CreateOutcome::Created => {}
            CreateOutcome::DuplicateKey(winner) => {
                info!(transfer_id = %winner.id, "lost idempotency race, returning sibling");
                metrics::counter!("transfers_idempotent_replays").increment(1);
                return Ok(winner);
            }
        }

        // 4. Cross the ledger-call boundary, then call the journal.
        self.store.record_ledger_call(transfer.id).await?;
        let outcome = self.call_ledger(&transfer, cancel).await;

        // 5. Resolve.
        match outcome {
            Ok(entry_id) => {
                let completed = events::transfer_completed(transfer.id);
                self.store
                    .record_ledger_success(transfer.id, entry_id, &completed)
                    .await?;
                metrics::counter!("transfers_completed").increment(1);
                info!(transfer_id = %transfer.id, %entry_id, "transfer completed");
            }
            Err(error) if error.is_definitive() => {
                let reason = format!("ledger_rejected: {error}");
                let failed = events::transfer_failed(transfer.id, &reason);
                self.store
                    .record_failure(transfer.id, &reason, &failed)
                    .await?;
                metrics::counter!("transfers_failed").increment(1);
                warn!(transfer_id = %transfer.id, %error, "transfer failed");
            }
            Err(error) => {
                // Ambiguous: the journal may or may not have committed the
                // entry. Leave LEDGER_CALLED; the compensator reconciles
                // against the by-batch oracle.
                metrics::counter!("transfers_pending").increment(1);
                warn!(transfer_id = %transfer.id, %error, "journal outcome ambiguous, deferring to compensator");
            }
        }

        self.store
            .get(transfer.id)
            .await?
            .ok_or_else(|| OrchestratorError::Internal("transfer vanished mid-saga".to_string()))
    }

    /// Looks up a transfer by id.
    pub async fn get(&self, id: common::TransferId) -> Result<Option<Transfer>> {
        self.store.get(id).await
    }

    /// The guarded journal call: circuit breaker outside, bounded
    /// exponential-backoff retry inside. Any error counts against the
    /// breaker; a short-circuited call never reaches the network.
    async fn call_ledger(
        &self,
        transfer: &Transfer,
        cancel: &CancellationToken,
    ) -> std::result::Result<common::EntryId, LedgerError> {
        if !self.breaker.allow() {
            let (state, failures, _) = self.breaker.snapshot();
            warn!(circuit = %state, failures, "journal call short-circuited");
            return Err(LedgerError::CircuitOpen);
        }

        let result = retry(
            &self.retry_config,
            cancel,
            || self.ledger.post_entry(transfer),
            |error: &LedgerError| !error.is_definitive(),
        )
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idem::InMemoryGuard;
    use crate::ledger::InMemoryLedger;
    use crate::resilience::CircuitBreakerConfig;
    use crate::store::InMemoryTransferStore;
    use domain::TransferState;
    use std::time::Duration;

    fn executor(
        store: &InMemoryTransferStore,
        ledger: &InMemoryLedger,
        guard: &InMemoryGuard,
    ) -> SagaExecutor<InMemoryTransferStore, InMemoryLedger, InMemoryGuard> {
        SagaExecutor::new(
            store.clone(),
            ledger.clone(),
            guard.clone(),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        )
        .with_retry_config(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiple: 2.0,
        })
    }

    fn cmd(key: &str) -> CreateTransfer {
        CreateTransfer {
            from_account: AccountId::new(),
            to_account: AccountId::new(),
            amount_minor: 5000,
            currency: "USD".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn happy_path_completes_and_emits_lifecycle_events() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let guard = InMemoryGuard::new();
        let saga = executor(&store, &ledger, &guard);

        let transfer = saga
            .execute(cmd("happy-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.state, TransferState::Completed);
        assert!(transfer.ledger_entry_id.is_some());
        assert!(transfer.ledger_call_at.is_some());

        let events: Vec<String> = store
            .outbox()
            .records()
            .iter()
            .map(|r| r.event_type.clone())
            .collect();
        assert_eq!(events, vec!["TransferInitiated", "TransferCompleted"]);
    }

    #[tokio::test]
    async fn validation_failure_writes_nothing() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let guard = InMemoryGuard::new();
        let saga = executor(&store, &ledger, &guard);

        let mut bad = cmd("bad-amount");
        bad.amount_minor = 0;
        let err = saga.execute(bad, &CancellationToken::new()).await;

        assert!(matches!(err, Err(OrchestratorError::Validation(_))));
        assert_eq!(store.transfer_count(), 0);
        assert_eq!(store.outbox().unsent_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_key_returns_original_unchanged() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let guard = InMemoryGuard::new();
        let saga = executor(&store, &ledger, &guard);
        let cancel = CancellationToken::new();

        let first = saga.execute(cmd("dup-1"), &cancel).await.unwrap();

        // Different payload, same key: the original wins, nothing mutates.
        let mut conflicting = cmd("dup-1");
        conflicting.amount_minor = 9999;
        let second = saga.execute(conflicting, &cancel).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.amount_minor, 5000);
        assert_eq!(store.transfer_count(), 1);
        assert_eq!(ledger.post_calls(), 1);
    }

    #[tokio::test]
    async fn in_flight_sibling_is_rejected_as_conflict() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let guard = InMemoryGuard::new();
        let saga = executor(&store, &ledger, &guard);

        // Simulate an in-flight sibling holding the claim with no row yet.
        assert!(guard
            .claim("transfer:storm-1", CLAIM_TTL)
            .await
            .unwrap());

        let err = saga
            .execute(cmd("storm-1"), &CancellationToken::new())
            .await;
        assert!(matches!(err, Err(OrchestratorError::DuplicateInFlight)));
        assert_eq!(store.transfer_count(), 0);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_database() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let guard = InMemoryGuard::new();
        guard.set_unavailable(true);
        let saga = executor(&store, &ledger, &guard);

        let transfer = saga
            .execute(cmd("no-cache"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transfer.state, TransferState::Completed);
    }

    #[tokio::test]
    async fn definitive_rejection_fails_the_saga() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        ledger.reject(400, "unbalanced entry");
        let guard = InMemoryGuard::new();
        let saga = executor(&store, &ledger, &guard);

        let transfer = saga
            .execute(cmd("rejected-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.state, TransferState::Failed);
        assert!(transfer
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("ledger_rejected"));
        // 4xx is definitive: exactly one attempt.
        assert_eq!(ledger.post_calls(), 1);

        let events: Vec<String> = store
            .outbox()
            .records()
            .iter()
            .map(|r| r.event_type.clone())
            .collect();
        assert_eq!(events, vec!["TransferInitiated", "TransferFailed"]);
    }

    #[tokio::test]
    async fn ambiguous_outcome_leaves_ledger_called_for_compensator() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        ledger.set_unreachable();
        let guard = InMemoryGuard::new();
        let saga = executor(&store, &ledger, &guard);

        let transfer = saga
            .execute(cmd("pending-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.state, TransferState::LedgerCalled);
        assert!(transfer.ledger_call_at.is_some());
        // Retries exhausted the configured three attempts.
        assert_eq!(ledger.post_calls(), 3);

        // No terminal event yet; only the initiation is in the outbox.
        let events: Vec<String> = store
            .outbox()
            .records()
            .iter()
            .map(|r| r.event_type.clone())
            .collect();
        assert_eq!(events, vec!["TransferInitiated"]);
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_unreachable_sagas() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        ledger.set_unreachable();
        let guard = InMemoryGuard::new();

        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 2,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }));
        let saga = SagaExecutor::new(store.clone(), ledger.clone(), guard.clone(), breaker.clone())
            .with_retry_config(RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_multiple: 2.0,
            });
        let cancel = CancellationToken::new();

        saga.execute(cmd("cb-1"), &cancel).await.unwrap();
        saga.execute(cmd("cb-2"), &cancel).await.unwrap();
        let calls_before = ledger.post_calls();

        // Breaker is open now: the next saga never touches the network.
        let transfer = saga.execute(cmd("cb-3"), &cancel).await.unwrap();
        assert_eq!(transfer.state, TransferState::LedgerCalled);
        assert_eq!(ledger.post_calls(), calls_before);
        assert_eq!(saga.breaker.state(), crate::resilience::CircuitState::Open);
    }
}
