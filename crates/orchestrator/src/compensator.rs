//! Background reconciler for transfers stranded mid-saga.

use std::time::Duration;

use chrono::Utc;
use domain::Transfer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events;
use crate::ledger::LedgerGateway;
use crate::store::TransferStore;
use crate::Result;

/// Reason recorded when the journal definitively has no entry for a stale
/// transfer.
pub const REASON_ENTRY_NOT_FOUND: &str = "ledger_entry_not_found";

/// Compensator tuning knobs.
#[derive(Debug, Clone)]
pub struct CompensatorConfig {
    /// How often to scan for stale transfers.
    pub poll_interval: Duration,
    /// A transfer is stale once its ledger-call boundary is older than this.
    pub stale_timeout: chrono::Duration,
    /// Maximum transfers recovered per tick.
    pub batch_size: i64,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_timeout: chrono::Duration::minutes(5),
            batch_size: 50,
        }
    }
}

/// Scans for transfers stuck between the ledger-call boundary and a terminal
/// state, and reconciles each with the journal's by-batch oracle.
///
/// The journal is the ordering oracle for the accounting view: an entry
/// exists means the transfer completed, a definitive miss means it failed.
/// Every step is idempotent against the transfer row, so a peer (the request
/// path, or another compensator replica) finalizing first is observed
/// silently.
pub struct Compensator<S, L> {
    store: S,
    ledger: L,
    config: CompensatorConfig,
}

impl<S: TransferStore, L: LedgerGateway> Compensator<S, L> {
    pub fn new(store: S, ledger: L, config: CompensatorConfig) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Runs the reconcile loop until cancelled. Ticks once immediately so a
    /// restart drains the backlog without waiting a full interval.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("compensator started");

        if let Err(error) = self.tick().await {
            warn!(%error, "compensator tick failed");
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick already ran

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("compensator stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        warn!(%error, "compensator tick failed");
                    }
                }
            }
        }
    }

    /// One scan: find stale transfers and reconcile each.
    pub async fn tick(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.config.stale_timeout;
        let stale = self
            .store
            .stale_transfers(cutoff, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            return Ok(0);
        }
        info!(count = stale.len(), "recovering stale transfers");

        let mut recovered = 0;
        for transfer in stale {
            match self.recover(&transfer).await {
                Ok(()) => recovered += 1,
                Err(error) => {
                    warn!(transfer_id = %transfer.id, %error, "recovery attempt failed");
                }
            }
        }
        Ok(recovered)
    }

    /// Reconciles a single transfer with the journal.
    #[tracing::instrument(skip(self, transfer), fields(transfer_id = %transfer.id, state = %transfer.state))]
    async fn recover(&self, transfer: &Transfer) -> Result<()> {
        self.store.mark_recovering(transfer.id).await?;
        self.store.increment_recovery_attempts(transfer.id).await?;
        metrics::counter!("compensator_recovery_attempts").increment(1);

        match self.ledger.entry_by_batch(transfer.batch_id()).await {
            Ok(Some(entry_id)) => {
                // The journal committed before the orchestrator could record
                // it: finish the happy path.
                let completed = events::transfer_completed(transfer.id);
                let applied = self
                    .store
                    .record_ledger_success(transfer.id, entry_id, &completed)
                    .await?;
                if applied {
                    metrics::counter!("compensator_transfers_completed").increment(1);
                    info!(%entry_id, "stale transfer recovered as COMPLETED");
                } else {
                    debug!("peer already finalized the transfer");
                }
                Ok(())
            }
            Ok(None) => {
                // Definitive miss: the entry never committed.
                let failed = events::transfer_failed(transfer.id, REASON_ENTRY_NOT_FOUND);
                let applied = self
                    .store
                    .record_failure(transfer.id, REASON_ENTRY_NOT_FOUND, &failed)
                    .await?;
                if applied {
                    metrics::counter!("compensator_transfers_failed").increment(1);
                    info!("stale transfer recovered as FAILED");
                }
                Ok(())
            }
            Err(error) => {
                // Journal unreachable: stay in RECOVERING, retry next tick.
                warn!(%error, "journal unreachable, will retry");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::store::InMemoryTransferStore;
    use common::{AccountId, EntryId};
    use domain::TransferState;

    fn stale_transfer(store: &InMemoryTransferStore, state: TransferState) -> Transfer {
        let mut transfer = Transfer::new(
            AccountId::new(),
            AccountId::new(),
            5000,
            "USD",
            format!("stale-{}", uuid::Uuid::new_v4()),
        )
        .unwrap();
        transfer.state = state;
        transfer.ledger_call_at = Some(Utc::now() - chrono::Duration::minutes(10));
        store.put(transfer.clone());
        transfer
    }

    fn compensator(
        store: &InMemoryTransferStore,
        ledger: &InMemoryLedger,
    ) -> Compensator<InMemoryTransferStore, InMemoryLedger> {
        Compensator::new(store.clone(), ledger.clone(), CompensatorConfig::default())
    }

    #[tokio::test]
    async fn completes_transfer_whose_entry_exists() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let transfer = stale_transfer(&store, TransferState::LedgerCalled);
        let entry_id = EntryId::new();
        ledger.seed_entry(transfer.id, entry_id);

        let recovered = compensator(&store, &ledger).tick().await.unwrap();
        assert_eq!(recovered, 1);

        let after = store.get(transfer.id).await.unwrap().unwrap();
        assert_eq!(after.state, TransferState::Completed);
        assert_eq!(after.ledger_entry_id, Some(entry_id));
        assert_eq!(after.recovery_attempts, 1);

        let events: Vec<String> = store
            .outbox()
            .records()
            .iter()
            .map(|r| r.event_type.clone())
            .collect();
        assert_eq!(events, vec!["TransferCompleted"]);
    }

    #[tokio::test]
    async fn fails_transfer_with_no_journal_entry() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let transfer = stale_transfer(&store, TransferState::LedgerCalled);

        compensator(&store, &ledger).tick().await.unwrap();

        let after = store.get(transfer.id).await.unwrap().unwrap();
        assert_eq!(after.state, TransferState::Failed);
        assert_eq!(after.failure_reason.as_deref(), Some(REASON_ENTRY_NOT_FOUND));

        let events: Vec<String> = store
            .outbox()
            .records()
            .iter()
            .map(|r| r.event_type.clone())
            .collect();
        assert_eq!(events, vec!["TransferFailed"]);
    }

    #[tokio::test]
    async fn unreachable_journal_leaves_transfer_recovering() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        ledger.set_unreachable();
        let transfer = stale_transfer(&store, TransferState::LedgerCalled);

        compensator(&store, &ledger).tick().await.unwrap();

        let after = store.get(transfer.id).await.unwrap().unwrap();
        assert_eq!(after.state, TransferState::Recovering);
        assert_eq!(after.recovery_attempts, 1);

        // Journal comes back with the entry committed: next tick completes.
        ledger.succeed();
        let entry_id = EntryId::new();
        ledger.seed_entry(transfer.id, entry_id);
        compensator(&store, &ledger).tick().await.unwrap();

        let after = store.get(transfer.id).await.unwrap().unwrap();
        assert_eq!(after.state, TransferState::Completed);
        assert_eq!(after.recovery_attempts, 2);
    }

    #[tokio::test]
    async fn fresh_transfers_are_not_touched() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();

        let mut fresh = Transfer::new(
            AccountId::new(),
            AccountId::new(),
            100,
            "USD",
            "fresh-key",
        )
        .unwrap();
        fresh.state = TransferState::LedgerCalled;
        fresh.ledger_call_at = Some(Utc::now());
        store.put(fresh.clone());

        let recovered = compensator(&store, &ledger).tick().await.unwrap();
        assert_eq!(recovered, 0);
        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().state,
            TransferState::LedgerCalled
        );
    }

    #[tokio::test]
    async fn peer_finalized_transfer_is_observed_silently() {
        let store = InMemoryTransferStore::new();
        let ledger = InMemoryLedger::new();
        let transfer = stale_transfer(&store, TransferState::Recovering);
        ledger.seed_entry(transfer.id, EntryId::new());

        // A peer finalizes between the scan and the reconcile.
        let mut finalized = transfer.clone();
        finalized.state = TransferState::Completed;
        finalized.ledger_entry_id = Some(EntryId::new());
        let peer_entry = finalized.ledger_entry_id;
        store.put(finalized);

        compensator(&store, &ledger)
            .recover(&transfer)
            .await
            .unwrap();

        // The peer's terminal write is untouched and no duplicate event is
        // added beyond what the peer wrote.
        let after = store.get(transfer.id).await.unwrap().unwrap();
        assert_eq!(after.state, TransferState::Completed);
        assert_eq!(after.ledger_entry_id, peer_entry);
        assert_eq!(store.outbox().unsent_count(), 0);
    }
}
