//! Orchestrator configuration loaded from environment variables.

use std::time::Duration;

use outbox::{KafkaConfig, RelayConfig, SaslConfig};

use crate::compensator::CompensatorConfig;

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `PORT` — listen port (default: `7103`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (required)
/// - `DB_MAX_CONNECTIONS` — max database pool connections (default: `10`)
/// - `KAFKA_BROKERS` — comma-separated bootstrap servers (required)
/// - `KAFKA_SASL_{USERNAME,PASSWORD,MECHANISM}` — optional SASL credentials
/// - `REDIS_URL` — idempotency cache (optional; absence degrades gracefully)
/// - `LEDGER_URL` — base URL of the journal service (required)
/// - `OUTBOX_POLL_INTERVAL_MS` — relay poll interval (default: `100`)
/// - `COMPENSATOR_POLL_INTERVAL_SECS` — default `30`
/// - `COMPENSATOR_STALE_TIMEOUT_SECS` — default `300`
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub kafka_brokers: Option<String>,
    pub kafka_sasl: Option<SaslConfig>,
    pub redis_url: Option<String>,
    pub ledger_url: Option<String>,
    pub outbox_poll_interval: Duration,
    pub compensator_poll_interval: Duration,
    pub compensator_stale_timeout: chrono::Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7103),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            kafka_brokers: std::env::var("KAFKA_BROKERS").ok(),
            kafka_sasl: sasl_from_env(),
            redis_url: std::env::var("REDIS_URL").ok(),
            ledger_url: std::env::var("LEDGER_URL").ok(),
            outbox_poll_interval: Duration::from_millis(
                std::env::var("OUTBOX_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
            compensator_poll_interval: Duration::from_secs(
                std::env::var("COMPENSATOR_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            compensator_stale_timeout: chrono::Duration::seconds(
                std::env::var("COMPENSATOR_STALE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
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

    pub fn compensator(&self) -> CompensatorConfig {
        CompensatorConfig {
            poll_interval: self.compensator_poll_interval,
            stale_timeout: self.compensator_stale_timeout,
            ..CompensatorConfig::default()
        }
    }
}

fn sasl_from_env() -> Option<SaslConfig> {
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
