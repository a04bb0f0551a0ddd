//! Resilience primitives guarding the journal call.

pub mod breaker;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{retry, RetryConfig};
