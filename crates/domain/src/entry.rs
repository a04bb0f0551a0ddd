//! Journal entries and double-entry validation.

use chrono::{DateTime, Utc};
use common::{AccountId, EntryId, TransferId};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The debit or credit side of a journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    /// The opposite side; used when building a void entry.
    pub fn flipped(&self) -> Self {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }

    /// Wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Debit => "DEBIT",
            Side::Credit => "CREDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBIT" => Some(Side::Debit),
            "CREDIT" => Some(Side::Credit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single debit or credit line in a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub account_id: AccountId,
    pub amount_minor: i64,
    pub side: Side,
}

/// A complete journal entry: an ordered set of lines that must balance.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub entry_id: EntryId,
    /// Correlator grouping this entry's lines; equals the originating
    /// transfer id for saga-produced entries.
    pub batch_id: TransferId,
    /// Currency of every line, propagated from the posting request.
    pub currency: String,
    pub lines: Vec<Line>,
    pub timestamp: DateTime<Utc>,
    pub voided: bool,
}

impl Entry {
    /// Creates a new journal entry, enforcing the double-entry invariants.
    pub fn new(
        batch_id: TransferId,
        currency: impl Into<String>,
        lines: Vec<Line>,
    ) -> Result<Self, ValidationError> {
        let entry = Self {
            entry_id: EntryId::new(),
            batch_id,
            currency: currency.into(),
            lines,
            timestamp: Utc::now(),
            voided: false,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Checks the double-entry accounting invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.currency.len() != 3 {
            return Err(ValidationError::new(
                "currency",
                "currency must be a 3-letter ISO code",
            ));
        }
        if self.lines.len() < 2 {
            return Err(ValidationError::new(
                "lines",
                format!("entry must have at least 2 lines, got {}", self.lines.len()),
            ));
        }

        let mut debit_sum: i64 = 0;
        let mut credit_sum: i64 = 0;

        for (i, line) in self.lines.iter().enumerate() {
            if line.amount_minor <= 0 {
                return Err(ValidationError::new(
                    "lines",
                    format!(
                        "lines[{i}].amount must be positive, got {}",
                        line.amount_minor
                    ),
                ));
            }
            match line.side {
                Side::Debit => debit_sum += line.amount_minor,
                Side::Credit => credit_sum += line.amount_minor,
            }
        }

        if debit_sum == 0 {
            return Err(ValidationError::new(
                "lines",
                "entry must have at least one debit line",
            ));
        }
        if credit_sum == 0 {
            return Err(ValidationError::new(
                "lines",
                "entry must have at least one credit line",
            ));
        }
        if debit_sum != credit_sum {
            return Err(ValidationError::new(
                "lines",
                format!("debits ({debit_sum}) must equal credits ({credit_sum})"),
            ));
        }

        Ok(())
    }

    /// Builds the compensating entry for this one: the same lines with their
    /// sides swapped, under the same batch id. A void entry balances by
    /// construction because the original did.
    pub fn void(&self) -> Entry {
        Entry {
            entry_id: EntryId::new(),
            batch_id: self.batch_id,
            currency: self.currency.clone(),
            lines: self
                .lines
                .iter()
                .map(|l| Line {
                    account_id: l.account_id,
                    amount_minor: l.amount_minor,
                    side: l.side.flipped(),
                })
                .collect(),
            timestamp: Utc::now(),
            voided: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced_lines(amount: i64) -> Vec<Line> {
        vec![
            Line {
                account_id: AccountId::new(),
                amount_minor: amount,
                side: Side::Debit,
            },
            Line {
                account_id: AccountId::new(),
                amount_minor: amount,
                side: Side::Credit,
            },
        ]
    }

    #[test]
    fn balanced_entry_is_valid() {
        let entry = Entry::new(TransferId::new(), "USD", balanced_lines(5000)).unwrap();
        assert_eq!(entry.lines.len(), 2);
        assert!(!entry.voided);
    }

    #[test]
    fn rejects_fewer_than_two_lines() {
        let lines = vec![Line {
            account_id: AccountId::new(),
            amount_minor: 100,
            side: Side::Debit,
        }];
        let err = Entry::new(TransferId::new(), "USD", lines).unwrap_err();
        assert_eq!(err.field, "lines");
    }

    #[test]
    fn rejects_unbalanced_entry() {
        let lines = vec![
            Line {
                account_id: AccountId::new(),
                amount_minor: 100,
                side: Side::Debit,
            },
            Line {
                account_id: AccountId::new(),
                amount_minor: 99,
                side: Side::Credit,
            },
        ];
        assert!(Entry::new(TransferId::new(), "USD", lines).is_err());
    }

    #[test]
    fn rejects_single_sided_entries() {
        let debits_only = vec![
            Line {
                account_id: AccountId::new(),
                amount_minor: 50,
                side: Side::Debit,
            },
            Line {
                account_id: AccountId::new(),
                amount_minor: 50,
                side: Side::Debit,
            },
        ];
        assert!(Entry::new(TransferId::new(), "USD", debits_only).is_err());

        let credits_only = vec![
            Line {
                account_id: AccountId::new(),
                amount_minor: 50,
                side: Side::Credit,
            },
            Line {
                account_id: AccountId::new(),
                amount_minor: 50,
                side: Side::Credit,
            },
        ];
        assert!(Entry::new(TransferId::new(), "USD", credits_only).is_err());
    }

    #[test]
    fn rejects_non_positive_line_amounts() {
        let lines = vec![
            Line {
                account_id: AccountId::new(),
                amount_minor: 0,
                side: Side::Debit,
            },
            Line {
                account_id: AccountId::new(),
                amount_minor: 0,
                side: Side::Credit,
            },
        ];
        assert!(Entry::new(TransferId::new(), "USD", lines).is_err());
    }

    #[test]
    fn rejects_bad_currency() {
        assert!(Entry::new(TransferId::new(), "usd!", balanced_lines(10)).is_err());
    }

    #[test]
    fn void_swaps_sides_and_keeps_batch() {
        let entry = Entry::new(TransferId::new(), "USD", balanced_lines(5000)).unwrap();
        let void = entry.void();

        assert_ne!(void.entry_id, entry.entry_id);
        assert_eq!(void.batch_id, entry.batch_id);
        assert_eq!(void.lines[0].side, Side::Credit);
        assert_eq!(void.lines[1].side, Side::Debit);
        assert!(void.validate().is_ok());
    }

    #[test]
    fn side_parse_and_flip() {
        assert_eq!(Side::parse("DEBIT"), Some(Side::Debit));
        assert_eq!(Side::parse("CREDIT"), Some(Side::Credit));
        assert_eq!(Side::parse("debit"), None);
        assert_eq!(Side::Debit.flipped(), Side::Credit);
    }
}
