//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry tuning knobs.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiple: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiple: 2.0,
        }
    }
}

/// Runs `f` up to `config.max_attempts` times with exponential backoff.
///
/// `is_retryable` short-circuits the loop for definitive errors. Backoff
/// sleeps race the cancellation token; a cancelled wait returns the last
/// error immediately.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut f: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(error) => {
                if !is_retryable(&error) || attempt >= max_attempts {
                    if attempt >= max_attempts {
                        warn!(attempts = max_attempts, %error, "retry exhausted");
                    }
                    return Err(error);
                }

                debug!(attempt, %error, delay_ms = delay.as_millis() as u64, "attempt failed, retrying");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        debug!("retry cancelled during backoff");
                        return Err(error);
                    }
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiple)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }

    unreachable!("retry loop always returns within max_attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiple: 2.0,
        }
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(
            &fast_config(),
            &CancellationToken::new(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(
            &fast_config(),
            &CancellationToken::new(),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(
            &fast_config(),
            &CancellationToken::new(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still down".to_string()) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "still down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn definitive_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(
            &fast_config(),
            &CancellationToken::new(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("bad request".to_string()) }
            },
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_cuts_backoff_short() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            ..fast_config()
        };
        let started = std::time::Instant::now();
        let result: Result<u32, String> = retry(
            &config,
            &cancel,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
