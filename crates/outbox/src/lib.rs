//! Transactional outbox and its relay worker.
//!
//! A writer service inserts an [`OutboxRecord`] in the same database
//! transaction as the state change it describes; the [`Relay`] drains the
//! table to the event bus at least once, marking records sent only after the
//! bus acknowledged the write. Consumers deduplicate on `event_id`, so the
//! crash window between publish-ack and mark-sent costs a duplicate delivery,
//! never a loss.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod record;
pub mod relay;
pub mod store;

pub use error::{OutboxError, Result};
pub use memory::{InMemoryOutboxStore, InMemoryPublisher, PublishedMessage};
pub use postgres::{enqueue, PostgresOutboxStore};
pub use publisher::{EventPublisher, KafkaConfig, KafkaPublisher, SaslConfig};
pub use record::OutboxRecord;
pub use relay::{Relay, RelayConfig};
pub use store::{OutboxBatch, OutboxStore};
