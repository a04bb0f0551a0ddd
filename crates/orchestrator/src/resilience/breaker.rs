//! Circuit breaker guarding the journal call.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::info;

/// The state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass; consecutive failures are counted.
    Closed,
    /// Requests short-circuit until the reset timeout elapses.
    Open,
    /// Probing: successes accumulate toward closing, any failure reopens.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub max_failures: u32,
    /// How long to stay open before probing.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

/// Process-local circuit breaker. State is not replicated across replicas;
/// independent replicas independently learn the journal is unhealthy.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a request may proceed. An open breaker whose reset timeout
    /// has elapsed transitions to half-open and lets the probe through.
    pub fn allow(&self) -> bool {
        {
            let inner = self.inner.read().unwrap();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let elapsed = inner
                        .last_failure
                        .map(|t| t.elapsed() >= self.config.reset_timeout)
                        .unwrap_or(true);
                    if !elapsed {
                        return false;
                    }
                }
            }
        }

        // Reset timeout elapsed; re-check under the write lock.
        let mut inner = self.inner.write().unwrap();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map(|t| t.elapsed() >= self.config.reset_timeout)
                .unwrap_or(true);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.successes = 0;
                info!("circuit breaker transitioning to HALF_OPEN");
            }
        }
        inner.state == CircuitState::HalfOpen
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.write().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    info!(
                        successes = self.config.success_threshold,
                        "circuit breaker CLOSED"
                    );
                }
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failures >= self.config.max_failures {
                    inner.state = CircuitState::Open;
                    info!(failures = inner.failures, "circuit breaker OPENED");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.successes = 0;
                info!("circuit breaker returned to OPEN after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().unwrap().state
    }

    /// Current (state, failures, successes), for logging.
    pub fn snapshot(&self) -> (CircuitState, u32, u32) {
        let inner = self.inner.read().unwrap();
        (inner.state, inner.failures, inner.successes)
    }
}
