//! Event bus publisher.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::error::OutboxError;
use crate::Result;

/// Something that can deliver one keyed, headered message to a topic and not
/// return until the bus acknowledged it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<()>;
}

/// SASL credentials for authenticated clusters.
#[derive(Debug, Clone)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
    /// "PLAIN" or "SCRAM-SHA-256".
    pub mechanism: String,
}

/// Kafka connection settings for the relay publisher.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap servers, comma-separated.
    pub brokers: String,
    pub sasl: Option<SaslConfig>,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            sasl: None,
        }
    }

    pub fn with_sasl(mut self, sasl: SaslConfig) -> Self {
        self.sasl = Some(sasl);
        self
    }

    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("message.timeout.ms", "5000");
        // Synchronous acks from all replicas; the relay marks a record sent
        // only once this producer's send future resolves.
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        if let Some(ref sasl) = self.sasl {
            config.set("security.protocol", "SASL_SSL");
            config.set("sasl.mechanism", &sasl.mechanism);
            config.set("sasl.username", &sasl.username);
            config.set("sasl.password", &sasl.password);
        }

        config
    }
}

/// Kafka publisher used by the per-service relays.
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| OutboxError::Publish(format!("failed to create Kafka producer: {e}")))?;

        info!(brokers = %config.brokers, "connected to Kafka");

        Ok(Self { producer })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: &[(String, String)],
    ) -> Result<()> {
        let mut owned = OwnedHeaders::new_with_capacity(headers.len());
        for (k, v) in headers {
            owned = owned.insert(Header {
                key: k,
                value: Some(v.as_bytes()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| OutboxError::Publish(format!("failed to publish: {e}")))?;

        debug!(topic = %topic, "published outbox record");
        Ok(())
    }
}
