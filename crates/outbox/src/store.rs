//! Storage abstraction for the relay's claim/mark cycle.

use async_trait::async_trait;
use common::EventId;

use crate::record::OutboxRecord;
use crate::Result;

/// A claimed batch of unsent records.
///
/// The batch holds whatever locks the backing store needs so that concurrent
/// relay workers skip each other's rows. Marks taken with [`mark_sent`] become
/// durable on [`commit`]; dropping the batch without committing releases the
/// claim and discards the marks, which re-exposes the records to the next
/// tick (at-least-once delivery).
///
/// [`mark_sent`]: OutboxBatch::mark_sent
/// [`commit`]: OutboxBatch::commit
#[async_trait]
pub trait OutboxBatch: Send {
    /// The claimed records, oldest first (created_at, then id).
    fn records(&self) -> &[OutboxRecord];

    /// Marks one record sent. Must only be called after the bus acknowledged
    /// the record's publish.
    async fn mark_sent(&mut self, id: EventId) -> Result<()>;

    /// Commits every mark taken so far. Records whose publish failed stay
    /// unmarked and are retried later; committed marks survive even when a
    /// later record in the same batch failed.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Store side of the transactional outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` unsent records, skipping rows already claimed by
    /// a concurrent worker.
    async fn begin_batch(&self, limit: i64) -> Result<Box<dyn OutboxBatch>>;

    /// Deletes records sent before `cutoff`. Returns the number purged.
    async fn purge_sent(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64>;
}
