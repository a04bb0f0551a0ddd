//! Journal service configuration loaded from environment variables.

use std::time::Duration;

use outbox::{KafkaConfig, RelayConfig, SaslConfig};

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `PORT` — listen port (default: `7102`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (required)
/// - `DB_MAX_CONNECTIONS` — max database pool connections (default: `10`)
/// - `KAFKA_BROKERS` — comma-separated bootstrap servers (required)
/// - `KAFKA_SASL_{USERNAME,PASSWORD,MECHANISM}` — optional SASL credentials
/// - `OUTBOX_POLL_INTERVAL_MS` — relay poll interval (default: `100`)
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub kafka_brokers: Option<String>,
    pub kafka_sasl: Option<SaslConfig>,
    pub outbox_poll_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7102),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            kafka_brokers: std::env::var("KAFKA_BROKERS").ok(),
            kafka_sasl: sasl_from_env(),
            outbox_poll_interval: Duration::from_millis(
                std::env::var("OUTBOX_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
        }
    }

    /// Returns the `"0.0.0.0:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Kafka settings for the relay publisher, if brokers were configured.
    pub fn kafka(&self) -> Option<KafkaConfig> {
        self.kafka_brokers.as_ref().map(|brokers| {
            let mut config = KafkaConfig::new(brokers.clone());
            if let Some(sasl) = self.kafka_sasl.clone() {
                config = config.with_sasl(sasl);
            }
            config
        })
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: self.outbox_poll_interval,
            ..RelayConfig::default()
        }
    }
}

pub(crate) fn sasl_from_env() -> Option<SaslConfig> {
    let username = std::env::var("KAFKA_SASL_USERNAME").ok()?;
    let password = std::env::var("KAFKA_SASL_PASSWORD").ok().unwrap_or_default();
    let mechanism =
        std::env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "PLAIN".to_string());
    Some(SaslConfig {
        username,
        password,
        mechanism,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_formats_bind_address() {
        let config = Config {
            port: 7102,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            kafka_brokers: None,
            kafka_sasl: None,
            outbox_poll_interval: Duration::from_millis(100),
        };
        assert_eq!(config.addr(), "0.0.0.0:7102");
        assert!(config.kafka().is_none());
    }

    #[test]
    fn kafka_config_carries_sasl() {
        let config = Config {
            port: 7102,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            kafka_brokers: Some("broker-1:9092,broker-2:9092".to_string()),
            kafka_sasl: Some(SaslConfig {
                username: "svc".to_string(),
                password: "secret".to_string(),
                mechanism: "SCRAM-SHA-256".to_string(),
            }),
            outbox_poll_interval: Duration::from_millis(100),
        };

        let kafka = config.kafka().unwrap();
        assert_eq!(kafka.brokers, "broker-1:9092,broker-2:9092");
        assert_eq!(kafka.sasl.unwrap().mechanism, "SCRAM-SHA-256");
    }

    #[test]
    fn relay_config_carries_poll_interval() {
        let config = Config {
            port: 7102,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            kafka_brokers: None,
            kafka_sasl: None,
            outbox_poll_interval: Duration::from_millis(250),
        };

        let relay = config.relay();
        assert_eq!(relay.poll_interval, Duration::from_millis(250));
        assert_eq!(relay.batch_size, RelayConfig::default().batch_size);
    }
}
