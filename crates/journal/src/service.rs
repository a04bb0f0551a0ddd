//! Posting and voiding of journal entries.

use common::{events, EntryId, EventType, TransferId};
use domain::{Entry, Line, Side};
use outbox::OutboxRecord;
use prost::Message;

use crate::store::{BatchLookup, JournalStore, PostOutcome};
use crate::Result;

/// Result of a post (or void) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostedEntry {
    pub entry_id: EntryId,
    pub batch_id: TransferId,
    /// False when the post was an idempotent replay of a known batch.
    pub created: bool,
}

/// Journal application service: validates entries and writes them together
/// with their `EntryPosted` outbox events.
#[derive(Clone)]
pub struct JournalService<S> {
    store: S,
}

impl<S: JournalStore> JournalService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Posts a balanced entry. Posting is idempotent on batch id: a known
    /// batch returns its existing entry untouched, which is what makes an
    /// orchestrator retry after an ambiguous timeout safe.
    #[tracing::instrument(skip(self, lines), fields(batch_id = %batch_id))]
    pub async fn post_entry(
        &self,
        batch_id: TransferId,
        currency: &str,
        lines: Vec<Line>,
    ) -> Result<PostedEntry> {
        let entry = Entry::new(batch_id, currency, lines)?;

        // Fast path before paying for the insert; the partial unique index
        // still arbitrates races.
        if let Some(existing) = self.store.get_entry_by_batch(batch_id).await? {
            tracing::info!(entry_id = %existing.entry_id, "batch already posted");
            return Ok(PostedEntry {
                entry_id: existing.entry_id,
                batch_id,
                created: false,
            });
        }

        let event = entry_posted_record(&entry);
        match self.store.insert_entry(&entry, &event).await? {
            PostOutcome::Inserted => {
                metrics::counter!("journal_entries_posted", "currency" => entry.currency.clone())
                    .increment(1);
                Ok(PostedEntry {
                    entry_id: entry.entry_id,
                    batch_id,
                    created: true,
                })
            }
            PostOutcome::Duplicate { entry_id } => Ok(PostedEntry {
                entry_id,
                batch_id,
                created: false,
            }),
        }
    }

    /// Voids an entry by appending the compensating entry under the same
    /// batch id.
    #[tracing::instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn void_entry(&self, entry_id: EntryId) -> Result<PostedEntry> {
        let original = self
            .store
            .get_entry(entry_id)
            .await?
            .ok_or(crate::JournalError::NotFound(entry_id))?;
        if original.voided {
            return Err(crate::JournalError::AlreadyVoided(entry_id));
        }

        let void = original.void();
        let event = entry_posted_record(&void);
        self.store.void_entry(entry_id, &void, &event).await?;

        metrics::counter!("journal_entries_voided").increment(1);
        Ok(PostedEntry {
            entry_id: void.entry_id,
            batch_id: void.batch_id,
            created: true,
        })
    }

    /// The reconciliation oracle.
    pub async fn lookup_batch(&self, batch_id: TransferId) -> Result<Option<BatchLookup>> {
        self.store.get_entry_by_batch(batch_id).await
    }
}

/// Builds the `EntryPosted` outbox record for a committed entry.
fn entry_posted_record(entry: &Entry) -> OutboxRecord {
    let event = events::EntryPosted {
        entry_id: entry.entry_id.to_string(),
        batch_id: entry.batch_id.to_string(),
        lines: entry
            .lines
            .iter()
            .map(|line| events::EntryLine {
                account_id: line.account_id.to_string(),
                amount: Some(events::Money {
                    units: line.amount_minor,
                    currency: entry.currency.clone(),
                }),
                side: match line.side {
                    Side::Debit => events::Side::Debit as i32,
                    Side::Credit => events::Side::Credit as i32,
                },
            })
            .collect(),
        ts_unix_ms: entry.timestamp.timestamp_millis(),
    };

    OutboxRecord::new(
        "journal_entry",
        entry.entry_id.as_uuid(),
        EventType::EntryPosted,
        event.encode_to_vec(),
    )
}
