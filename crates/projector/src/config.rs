//! Projector configuration loaded from environment variables.

use crate::consumer::{ConsumerConfig, ConsumerSasl};

/// Consumer group for the journal-entry stream.
const ENTRY_GROUP: &str = "read-model-projections";
/// Consumer group for the transfer stream.
const TRANSFER_GROUP: &str = "read-model-transfer-projections";

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `PORT` — listen port (default: `7104`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (required)
/// - `DB_MAX_CONNECTIONS` — max database pool connections (default: `10`)
/// - `KAFKA_BROKERS` — comma-separated bootstrap servers (required)
/// - `KAFKA_SASL_{USERNAME,PASSWORD,MECHANISM}` — optional SASL credentials
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub kafka_brokers: Option<String>,
    pub kafka_sasl: Option<ConsumerSasl>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7104),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            kafka_brokers: std::env::var("KAFKA_BROKERS").ok(),
            kafka_sasl: sasl_from_env(),
        }
    }

    /// Returns the `"0.0.0.0:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Consumer config for the journal-entry topic.
    pub fn entry_consumer(&self) -> Option<ConsumerConfig> {
        self.consumer(common::events::TOPIC_ENTRY, ENTRY_GROUP)
    }

    /// Consumer config for the transfer topic.
    pub fn transfer_consumer(&self) -> Option<ConsumerConfig> {
        self.consumer(common::events::TOPIC_TRANSFER, TRANSFER_GROUP)
    }

    fn consumer(&self, topic: &str, group_id: &str) -> Option<ConsumerConfig> {
        self.kafka_brokers.as_ref().map(|brokers| ConsumerConfig {
            brokers: brokers.clone(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            sasl: self.kafka_sasl.clone(),
        })
    }
}

fn sasl_from_env() -> Option<ConsumerSasl> {
    let username = std::env::var("KAFKA_SASL_USERNAME").ok()?;
    let password = std::env::var("KAFKA_SASL_PASSWORD").ok().unwrap_or_default();
    let mechanism =
        std::env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "PLAIN".to_string());
    Some(ConsumerSasl {
        username,
        password,
        mechanism,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumers_subscribe_to_their_topics() {
        let config = Config {
            port: 7104,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            kafka_brokers: Some("broker:9092".to_string()),
            kafka_sasl: None,
        };

        let entry = config.entry_consumer().unwrap();
        assert_eq!(entry.topic, "ledger.entry.v1");
        assert_eq!(entry.group_id, "read-model-projections");

        let transfer = config.transfer_consumer().unwrap();
        assert_eq!(transfer.topic, "ledger.transfer.v1");
        assert_eq!(transfer.group_id, "read-model-transfer-projections");
    }
}
