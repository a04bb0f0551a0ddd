//! In-memory outbox store and publisher used by tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventId;

use crate::error::OutboxError;
use crate::record::OutboxRecord;
use crate::store::{OutboxBatch, OutboxStore};
use crate::publisher::EventPublisher;
use crate::Result;

#[derive(Default)]
struct Inner {
    /// Insertion order stands in for (created_at, id) ordering.
    records: Vec<OutboxRecord>,
    /// Ids claimed by an open batch; the analogue of row locks.
    claimed: HashSet<EventId>,
}

/// In-memory [`OutboxStore`] with claim semantics mirroring
/// SELECT ... FOR UPDATE SKIP LOCKED.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, as a writer's transaction would.
    pub fn enqueue(&self, record: OutboxRecord) {
        self.inner.lock().unwrap().records.push(record);
    }

    pub fn unsent_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.sent_at.is_none())
            .count()
    }

    pub fn sent_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.sent_at.is_some())
            .count()
    }

    pub fn records(&self) -> Vec<OutboxRecord> {
        self.inner.lock().unwrap().records.clone()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn begin_batch(&self, limit: i64) -> Result<Box<dyn OutboxBatch>> {
        let mut inner = self.inner.lock().unwrap();
        let batch: Vec<OutboxRecord> = inner
            .records
            .iter()
            .filter(|r| r.sent_at.is_none() && !inner.claimed.contains(&r.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        for record in &batch {
            inner.claimed.insert(record.id);
        }

        Ok(Box::new(InMemoryBatch {
            inner: Arc::clone(&self.inner),
            records: batch,
            marked: Vec::new(),
            open: true,
        }))
    }

    async fn purge_sent(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.records.len();
        inner
            .records
            .retain(|r| match r.sent_at {
                Some(sent) => sent >= cutoff,
                None => true,
            });
        Ok((before - inner.records.len()) as u64)
    }
}

struct InMemoryBatch {
    inner: Arc<Mutex<Inner>>,
    records: Vec<OutboxRecord>,
    marked: Vec<EventId>,
    open: bool,
}

impl InMemoryBatch {
    fn release(&mut self) {
        if self.open {
            let mut inner = self.inner.lock().unwrap();
            for record in &self.records {
                inner.claimed.remove(&record.id);
            }
            self.open = false;
        }
    }
}

impl Drop for InMemoryBatch {
    fn drop(&mut self) {
        // Rollback semantics: claims release, uncommitted marks vanish.
        self.release();
    }
}

#[async_trait]
impl OutboxBatch for InMemoryBatch {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn mark_sent(&mut self, id: EventId) -> Result<()> {
        self.marked.push(id);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let now = Utc::now();
        {
            let mut inner = self.inner.lock().unwrap();
            for id in &self.marked {
                if let Some(record) = inner.records.iter_mut().find(|r| r.id == *id) {
                    record.sent_at = Some(now);
                }
            }
        }
        self.release();
        Ok(())
    }
}

/// A message delivered through the [`InMemoryPublisher`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// In-memory [`EventPublisher`] with scriptable failures.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
    fail_all: Arc<AtomicBool>,
    fail_keys: Arc<Mutex<HashSet<Vec<u8>>>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Makes every publish fail (bus unreachable).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_all.store(unreachable, Ordering::SeqCst);
    }

    /// Makes publishes with this message key fail.
    pub fn fail_key(&self, key: Vec<u8>) {
        self.fail_keys.lock().unwrap().insert(key);
    }

    pub fn clear_failures(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        self.fail_keys.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(OutboxError::Publish("bus unreachable".to_string()));
        }
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(OutboxError::Publish("scripted key failure".to_string()));
        }

        self.messages.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_vec(),
            payload: payload.to_vec(),
            headers: headers.to_vec(),
        });
        Ok(())
    }
}
