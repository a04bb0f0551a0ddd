//! Best-effort idempotency claims in a shared cache.
//!
//! The cache is advisory: it short-circuits obvious duplicates and surfaces
//! concurrent in-flight siblings cheaply. The authoritative check is the
//! unique constraint on `transfers.idempotency_key` — callers treat any
//! cache error as "proceed, trust the database".

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::{info, warn};

/// Default time-to-live for a claim.
pub const CLAIM_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum IdemError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// A short-lived claim holder.
#[async_trait]
pub trait IdemGuard: Send + Sync {
    /// Atomically claims `key` for `ttl`. Returns false when another request
    /// currently holds it.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, IdemError>;
}

/// Redis-backed guard using SET NX EX.
#[derive(Clone)]
pub struct RedisGuard {
    conn: Option<ConnectionManager>,
}

impl RedisGuard {
    /// Connects to Redis. A failed connection degrades to a guard whose
    /// claims error, which callers already treat as "proceed".
    pub async fn connect(url: &str) -> Self {
        let conn = match redis::Client::open(url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => {
                    info!(%url, "connected to Redis");
                    Some(conn)
                }
                Err(error) => {
                    warn!(%url, %error, "Redis unavailable; idempotency falls back to the database");
                    None
                }
            },
            Err(error) => {
                warn!(%url, %error, "invalid Redis URL; idempotency falls back to the database");
                None
            }
        };
        Self { conn }
    }
}

#[async_trait]
impl IdemGuard for RedisGuard {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, IdemError> {
        let Some(conn) = self.conn.clone() else {
            return Err(IdemError::Unavailable("not connected".to_string()));
        };

        let mut conn = conn;
        let response: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("PENDING")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| IdemError::Unavailable(e.to_string()))?;

        Ok(response.is_some())
    }
}

/// In-memory guard for tests.
#[derive(Clone, Default)]
pub struct InMemoryGuard {
    claimed: Arc<Mutex<HashSet<String>>>,
    unavailable: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a cache outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    /// Releases a claim, as TTL expiry would.
    pub fn release(&self, key: &str) {
        self.claimed.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl IdemGuard for InMemoryGuard {
    async fn claim(&self, key: &str, _ttl: Duration) -> Result<bool, IdemError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(IdemError::Unavailable("scripted outage".to_string()));
        }
        Ok(self.claimed.lock().unwrap().insert(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claim_wins_second_loses() {
        let guard = InMemoryGuard::new();
        assert!(guard.claim("transfer:k1", CLAIM_TTL).await.unwrap());
        assert!(!guard.claim("transfer:k1", CLAIM_TTL).await.unwrap());
        assert!(guard.claim("transfer:k2", CLAIM_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let guard = InMemoryGuard::new();
        assert!(guard.claim("transfer:k", CLAIM_TTL).await.unwrap());
        guard.release("transfer:k");
        assert!(guard.claim("transfer:k", CLAIM_TTL).await.unwrap());
    }

    #[tokio::test]
    async fn outage_surfaces_as_error() {
        let guard = InMemoryGuard::new();
        guard.set_unavailable(true);
        assert!(guard.claim("transfer:k", CLAIM_TTL).await.is_err());
    }
}
