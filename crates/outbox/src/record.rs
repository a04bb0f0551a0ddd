//! The outbox record persisted alongside aggregate mutations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{EventId, EventType};
use uuid::Uuid;

/// A pending (or already relayed) event, co-located with the business state
/// it describes.
///
/// Invariant: a record is only ever inserted inside the same database
/// transaction that mutated its aggregate. `sent_at` transitions nil →
/// timestamp exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    /// Free-form bag stored with the record and forwarded to the bus; carries
    /// schema hints and any trace context captured at enqueue time.
    pub headers: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Creates an unsent record for a typed ledger event, stamping the
    /// schema header the consumers expect.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: EventType,
        payload: Vec<u8>,
    ) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "schema".to_string(),
            format!("ledger.v1.{}", event_type.as_str()),
        );

        Self {
            id: EventId::new(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type: event_type.as_str().to_string(),
            payload,
            headers,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    /// Adds a header to the stored bag.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The bus message key: the aggregate id's UUID text form. Keying by
    /// aggregate pins all of an aggregate's events to one partition.
    pub fn message_key(&self) -> Vec<u8> {
        self.aggregate_id.to_string().into_bytes()
    }

    /// Headers to attach on publish: the standard envelope merged over the
    /// stored bag.
    pub fn publish_headers(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.push(("event_id".to_string(), self.id.to_string()));
        all.push(("event_type".to_string(), self.event_type.clone()));
        all.push(("aggregate_id".to_string(), self.aggregate_id.to_string()));
        all.push(("aggregate_type".to_string(), self.aggregate_type.clone()));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unsent_and_carries_schema_header() {
        let agg = Uuid::new_v4();
        let record = OutboxRecord::new("Transfer", agg, EventType::TransferInitiated, vec![1, 2]);

        assert!(record.sent_at.is_none());
        assert_eq!(record.event_type, "TransferInitiated");
        assert_eq!(
            record.headers.get("schema").map(String::as_str),
            Some("ledger.v1.TransferInitiated")
        );
        assert_eq!(record.message_key(), agg.to_string().into_bytes());
    }

    #[test]
    fn publish_headers_include_envelope() {
        let record = OutboxRecord::new(
            "journal_entry",
            Uuid::new_v4(),
            EventType::EntryPosted,
            vec![],
        );
        let headers = record.publish_headers();

        for key in ["event_id", "event_type", "aggregate_id", "aggregate_type"] {
            assert!(
                headers.iter().any(|(k, _)| k == key),
                "missing header {key}"
            );
        }
    }
}
