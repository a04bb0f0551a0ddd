//! The relay worker that drains an outbox to the bus.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::publisher::EventPublisher;
use crate::store::OutboxStore;
use crate::Result;

/// Relay tuning knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often to poll for unsent records.
    pub poll_interval: Duration,
    /// Maximum records claimed per tick.
    pub batch_size: i64,
    /// Sent records older than this are purged.
    pub purge_after: chrono::Duration,
    /// How often the purge runs.
    pub purge_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 10,
            purge_after: chrono::Duration::hours(24),
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// Polls the local outbox and publishes committed records to the bus.
///
/// Delivery is at-least-once: a record is marked sent only after the bus
/// acknowledged it, and a crash between the ack and the mark re-delivers on
/// the next tick. Consumers deduplicate on `event_id`.
pub struct Relay<S, P> {
    store: S,
    publisher: P,
    config: RelayConfig,
}

impl<S: OutboxStore, P: EventPublisher> Relay<S, P> {
    pub fn new(store: S, publisher: P, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Runs the relay loop until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("outbox relay started");
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_purge = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("outbox relay stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        warn!(%error, "outbox tick failed");
                    }
                    if last_purge.elapsed() >= self.config.purge_interval {
                        last_purge = tokio::time::Instant::now();
                        match self.store.purge_sent(Utc::now() - self.config.purge_after).await {
                            Ok(purged) if purged > 0 => {
                                debug!(purged, "purged sent outbox records");
                            }
                            Ok(_) => {}
                            Err(error) => warn!(%error, "outbox purge failed"),
                        }
                    }
                }
            }
        }
    }

    /// Claims one batch and publishes it. Returns the number of records
    /// published and marked.
    ///
    /// A record is marked sent only after its publish was acknowledged, and
    /// the batch commits whatever succeeded even when a later publish failed.
    /// A failed publish poisons its aggregate_id for the remainder of the
    /// batch so a newer event can never overtake an undelivered older one on
    /// the same key.
    pub async fn tick(&self) -> Result<usize> {
        let mut batch = self.store.begin_batch(self.config.batch_size).await?;
        let records = batch.records().to_vec();
        if records.is_empty() {
            return Ok(0);
        }

        debug!(count = records.len(), "processing outbox batch");

        let mut published = 0usize;
        let mut poisoned: HashSet<Uuid> = HashSet::new();

        for record in &records {
            if poisoned.contains(&record.aggregate_id) {
                continue;
            }

            let topic = common::events::topic_for(&record.event_type);
            let publish = self
                .publisher
                .publish(
                    topic,
                    &record.message_key(),
                    &record.payload,
                    &record.publish_headers(),
                )
                .await;

            match publish {
                Ok(()) => {
                    batch.mark_sent(record.id).await?;
                    published += 1;
                    metrics::counter!("outbox_records_published").increment(1);
                }
                Err(error) => {
                    warn!(
                        event_id = %record.id,
                        aggregate_id = %record.aggregate_id,
                        %error,
                        "publish failed; record stays unsent"
                    );
                    metrics::counter!("outbox_publish_failures").increment(1);
                    poisoned.insert(record.aggregate_id);
                }
            }
        }

        batch.commit().await?;
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryOutboxStore, InMemoryPublisher};
    use crate::record::OutboxRecord;
    use common::EventType;

    fn relay(
        store: &InMemoryOutboxStore,
        publisher: &InMemoryPublisher,
    ) -> Relay<InMemoryOutboxStore, InMemoryPublisher> {
        Relay::new(store.clone(), publisher.clone(), RelayConfig::default())
    }

    fn transfer_record(aggregate_id: Uuid, payload: u8) -> OutboxRecord {
        OutboxRecord::new(
            "Transfer",
            aggregate_id,
            EventType::TransferInitiated,
            vec![payload],
        )
    }

    #[tokio::test]
    async fn publishes_and_marks_in_order() {
        let store = InMemoryOutboxStore::new();
        let publisher = InMemoryPublisher::new();
        let aggregate = Uuid::new_v4();

        store.enqueue(transfer_record(aggregate, 1));
        store.enqueue(transfer_record(aggregate, 2));
        store.enqueue(OutboxRecord::new(
            "journal_entry",
            Uuid::new_v4(),
            EventType::EntryPosted,
            vec![3],
        ));

        let published = relay(&store, &publisher).tick().await.unwrap();

        assert_eq!(published, 3);
        assert_eq!(store.unsent_count(), 0);

        let messages = publisher.messages();
        assert_eq!(messages[0].topic, "ledger.transfer.v1");
        assert_eq!(messages[0].payload, vec![1]);
        assert_eq!(messages[1].payload, vec![2]);
        assert_eq!(messages[2].topic, "ledger.entry.v1");
        assert!(messages[0]
            .headers
            .iter()
            .any(|(k, v)| k == "event_type" && v == "TransferInitiated"));
    }

    #[tokio::test]
    async fn bus_unreachable_leaves_whole_batch_unsent() {
        let store = InMemoryOutboxStore::new();
        let publisher = InMemoryPublisher::new();
        publisher.set_unreachable(true);

        store.enqueue(transfer_record(Uuid::new_v4(), 1));
        store.enqueue(transfer_record(Uuid::new_v4(), 2));

        let published = relay(&store, &publisher).tick().await.unwrap();
        assert_eq!(published, 0);
        assert_eq!(store.unsent_count(), 2);

        // Next tick after recovery drains everything.
        publisher.clear_failures();
        let published = relay(&store, &publisher).tick().await.unwrap();
        assert_eq!(published, 2);
        assert_eq!(store.unsent_count(), 0);
    }

    #[tokio::test]
    async fn failed_aggregate_is_skipped_but_others_commit() {
        let store = InMemoryOutboxStore::new();
        let publisher = InMemoryPublisher::new();
        let poisoned = Uuid::new_v4();
        let healthy = Uuid::new_v4();

        store.enqueue(transfer_record(poisoned, 1));
        store.enqueue(transfer_record(healthy, 2));
        store.enqueue(transfer_record(poisoned, 3));
        publisher.fail_key(poisoned.to_string().into_bytes());

        let published = relay(&store, &publisher).tick().await.unwrap();

        // Only the healthy aggregate got through; the poisoned aggregate's
        // later record was skipped, not published out of order.
        assert_eq!(published, 1);
        assert_eq!(store.unsent_count(), 2);
        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![2]);

        // Recovery: both poisoned records drain in their original order.
        publisher.clear_failures();
        let published = relay(&store, &publisher).tick().await.unwrap();
        assert_eq!(published, 2);
        let messages = publisher.messages();
        assert_eq!(messages[1].payload, vec![1]);
        assert_eq!(messages[2].payload, vec![3]);
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let store = InMemoryOutboxStore::new();
        let publisher = InMemoryPublisher::new();
        for i in 0..15 {
            store.enqueue(transfer_record(Uuid::new_v4(), i));
        }

        let published = relay(&store, &publisher).tick().await.unwrap();
        assert_eq!(published, 10);
        assert_eq!(store.unsent_count(), 5);
    }
}
