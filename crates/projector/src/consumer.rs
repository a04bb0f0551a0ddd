//! Kafka consumer feeding the projector.

use std::time::Duration;

use common::EventId;
use rdkafka::consumer::{Consumer as KafkaConsumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::ClientConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ProjectorError;
use crate::projection::Projector;
use crate::store::ReadStore;
use crate::Result;

/// SASL credentials for authenticated clusters.
#[derive(Debug, Clone)]
pub struct ConsumerSasl {
    pub username: String,
    pub password: String,
    pub mechanism: String,
}

/// Kafka consumer settings for one topic subscription.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
    pub sasl: Option<ConsumerSasl>,
}

impl ConsumerConfig {
    fn build_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("group.id", &self.group_id);
        // Offsets commit only after the projection transaction commits; a
        // crash in between re-delivers and the dedup absorbs it.
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");

        if let Some(ref sasl) = self.sasl {
            config.set("security.protocol", "SASL_SSL");
            config.set("sasl.mechanism", &sasl.mechanism);
            config.set("sasl.username", &sasl.username);
            config.set("sasl.password", &sasl.password);
        }

        config
    }
}

/// Consumes one topic and folds every message through the projector.
pub struct EventConsumer<R> {
    consumer: StreamConsumer,
    projector: Projector<R>,
    topic: String,
}

impl<R: ReadStore> EventConsumer<R> {
    pub fn new(config: &ConsumerConfig, projector: Projector<R>) -> Result<Self> {
        let consumer: StreamConsumer = config
            .build_client_config()
            .create()
            .map_err(|e| ProjectorError::Consumer(format!("failed to create consumer: {e}")))?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| ProjectorError::Consumer(format!("failed to subscribe: {e}")))?;

        info!(topic = %config.topic, group = %config.group_id, "subscribed");

        Ok(Self {
            consumer,
            projector,
            topic: config.topic.clone(),
        })
    }

    /// Runs the consume loop until cancelled.
    ///
    /// Back-pressure on failure: the offset is not committed, the loop
    /// pauses briefly, and the message is re-fetched. A persistent poison
    /// message therefore blocks its partition (no dead-letter sink yet).
    pub async fn run(&self, cancel: CancellationToken) {
        info!(topic = %self.topic, "consumer started");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(topic = %self.topic, "consumer stopping");
                    return;
                }
                received = self.consumer.recv() => received,
            };

            let message = match message {
                Ok(message) => message,
                Err(error) => {
                    error!(%error, "kafka receive error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let (event_id, event_type) = match extract_envelope(&message) {
                Some(envelope) => envelope,
                None => {
                    // Not one of ours; ack so it never comes back.
                    warn!(topic = %self.topic, "message missing event envelope headers, skipping");
                    let _ = self
                        .consumer
                        .commit_message(&message, rdkafka::consumer::CommitMode::Async);
                    continue;
                }
            };

            let payload = message.payload().unwrap_or_default();
            match self.projector.handle(event_id, &event_type, payload).await {
                Ok(()) => {
                    if let Err(error) = self
                        .consumer
                        .commit_message(&message, rdkafka::consumer::CommitMode::Async)
                    {
                        error!(%error, "failed to commit offset");
                    }
                }
                Err(error) => {
                    metrics::counter!("projector_events_errored", "event_type" => event_type)
                        .increment(1);
                    error!(event_id = %event_id, %error, "projection failed, will retry");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Pulls (event_id, event_type) out of the message headers.
fn extract_envelope<M: Message>(message: &M) -> Option<(EventId, String)> {
    let headers = message.headers()?;
    let mut event_id = None;
    let mut event_type = None;

    for header in headers.iter() {
        match header.key {
            "event_id" => {
                let raw = std::str::from_utf8(header.value?).ok()?;
                event_id = raw.parse::<EventId>().ok();
            }
            "event_type" => {
                event_type = header
                    .value
                    .and_then(|v| std::str::from_utf8(v).ok())
                    .map(String::from);
            }
            _ => {}
        }
    }

    Some((event_id?, event_type?))
}
