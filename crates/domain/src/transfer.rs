//! Transfer aggregate and its saga state machine.

use chrono::{DateTime, Utc};
use common::{AccountId, EntryId, TransferId};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The state of a transfer in its saga lifecycle.
///
/// State transitions:
/// ```text
/// INITIATED ──► LEDGER_CALLED ──┬──► COMPLETED
///                               ├──► FAILED
///                               └──► RECOVERING ──► {COMPLETED, FAILED}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferState {
    /// Transfer durably recorded; the journal has not been called yet.
    #[default]
    Initiated,

    /// The ledger-call boundary was crossed; outcome unknown until the
    /// journal answers or the compensator reconciles.
    LedgerCalled,

    /// Journal entry committed (terminal state).
    Completed,

    /// Definitive failure (terminal state).
    Failed,

    /// Claimed by the compensator; reconciliation in progress.
    Recovering,
}

impl TransferState {
    /// Returns true if the journal call can be issued in this state.
    pub fn can_call_ledger(&self) -> bool {
        matches!(self, TransferState::Initiated)
    }

    /// Returns true if the compensator may claim the transfer. Marking a
    /// transfer RECOVERING is a no-op in any other state.
    pub fn can_mark_recovering(&self) -> bool {
        matches!(self, TransferState::LedgerCalled)
    }

    /// Returns true if a terminal transition (completed/failed) is allowed.
    pub fn can_finalize(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state. Terminal states are
    /// write-once; only recovery bookkeeping may touch the row afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    /// Returns the state name in its wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Initiated => "INITIATED",
            TransferState::LedgerCalled => "LEDGER_CALLED",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
            TransferState::Recovering => "RECOVERING",
        }
    }

    /// Parses the storage form back into a state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(TransferState::Initiated),
            "LEDGER_CALLED" => Some(TransferState::LedgerCalled),
            "COMPLETED" => Some(TransferState::Completed),
            "FAILED" => Some(TransferState::Failed),
            "RECOVERING" => Some(TransferState::Recovering),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A money transfer between two accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount_minor: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub state: TransferState,
    pub ledger_entry_id: Option<EntryId>,
    pub ledger_call_at: Option<DateTime<Utc>>,
    pub recovery_attempts: i32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Creates a new transfer in the INITIATED state, validating inputs.
    pub fn new(
        from_account: AccountId,
        to_account: AccountId,
        amount_minor: i64,
        currency: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let currency = currency.into();
        let idempotency_key = idempotency_key.into();

        if amount_minor <= 0 {
            return Err(ValidationError::new(
                "amount_minor",
                "amount must be positive",
            ));
        }
        if currency.len() != 3 {
            return Err(ValidationError::new(
                "currency",
                "currency must be a 3-letter ISO code",
            ));
        }
        if from_account == to_account {
            return Err(ValidationError::new(
                "accounts",
                "from and to accounts must be different",
            ));
        }
        if idempotency_key.is_empty() {
            return Err(ValidationError::new(
                "idempotency_key",
                "idempotency key is required",
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: TransferId::new(),
            from_account,
            to_account,
            amount_minor,
            currency,
            idempotency_key,
            state: TransferState::Initiated,
            ledger_entry_id: None,
            ledger_call_at: None,
            recovery_attempts: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The journal batch id for this transfer's entry. Aliasing the batch id
    /// to the transfer id is what makes the by-batch lookup a reconciliation
    /// oracle.
    pub fn batch_id(&self) -> TransferId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> (AccountId, AccountId) {
        (AccountId::new(), AccountId::new())
    }

    #[test]
    fn new_transfer_starts_initiated() {
        let (a, b) = accounts();
        let t = Transfer::new(a, b, 5000, "USD", "key-1").unwrap();
        assert_eq!(t.state, TransferState::Initiated);
        assert_eq!(t.amount_minor, 5000);
        assert!(t.ledger_entry_id.is_none());
        assert_eq!(t.recovery_attempts, 0);
    }

    #[test]
    fn rejects_non_positive_amount() {
        let (a, b) = accounts();
        let err = Transfer::new(a, b, 0, "USD", "k").unwrap_err();
        assert_eq!(err.field, "amount_minor");
        let err = Transfer::new(a, b, -5, "USD", "k").unwrap_err();
        assert_eq!(err.field, "amount_minor");
    }

    #[test]
    fn rejects_bad_currency() {
        let (a, b) = accounts();
        assert!(Transfer::new(a, b, 1, "US", "k").is_err());
        assert!(Transfer::new(a, b, 1, "DOLLARS", "k").is_err());
    }

    #[test]
    fn rejects_same_account_transfer() {
        let a = AccountId::new();
        let err = Transfer::new(a, a, 1, "USD", "k").unwrap_err();
        assert_eq!(err.field, "accounts");
    }

    #[test]
    fn rejects_empty_idempotency_key() {
        let (a, b) = accounts();
        let err = Transfer::new(a, b, 1, "USD", "").unwrap_err();
        assert_eq!(err.field, "idempotency_key");
    }

    #[test]
    fn state_transition_predicates() {
        assert!(TransferState::Initiated.can_call_ledger());
        assert!(!TransferState::LedgerCalled.can_call_ledger());

        assert!(TransferState::LedgerCalled.can_mark_recovering());
        assert!(!TransferState::Initiated.can_mark_recovering());
        assert!(!TransferState::Recovering.can_mark_recovering());
        assert!(!TransferState::Completed.can_mark_recovering());

        assert!(TransferState::LedgerCalled.can_finalize());
        assert!(TransferState::Recovering.can_finalize());
        assert!(!TransferState::Completed.can_finalize());
        assert!(!TransferState::Failed.can_finalize());
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Initiated.is_terminal());
        assert!(!TransferState::LedgerCalled.is_terminal());
        assert!(!TransferState::Recovering.is_terminal());
    }

    #[test]
    fn state_parse_inverts_as_str() {
        for s in [
            TransferState::Initiated,
            TransferState::LedgerCalled,
            TransferState::Completed,
            TransferState::Failed,
            TransferState::Recovering,
        ] {
            assert_eq!(TransferState::parse(s.as_str()), Some(s));
        }
        assert_eq!(TransferState::parse("PENDING"), None);
    }

    #[test]
    fn batch_id_aliases_transfer_id() {
        let (a, b) = accounts();
        let t = Transfer::new(a, b, 100, "EUR", "k").unwrap();
        assert_eq!(t.batch_id(), t.id);
    }
}
