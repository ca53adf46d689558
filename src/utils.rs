use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Retry an operation with exponential backoff. Only errors the predicate
/// accepts are retried; anything else is returned immediately.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    mut operation: F,
    config: RetryConfig,
    operation_name: &str,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(
            "Attempting {} (attempt {}/{})",
            operation_name, attempt, config.max_attempts
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempts", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                error!("{} failed with a non-retryable error: {}", operation_name, e);
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                error!("{} failed after {} attempts: {}", operation_name, attempt, e);
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "{} attempt {} failed: {}, retrying in {:?}",
                    operation_name, attempt, e, delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.exponential_base)
                        .min(config.max_delay.as_secs_f64()),
                );

                if config.jitter {
                    use rand::Rng;
                    let jitter = rand::thread_rng().gen_range(0.8..1.2);
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let attempt = AtomicUsize::new(0);
        let operation = || async {
            if attempt.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok("done")
            }
        };

        let result =
            retry_with_backoff(operation, fast_config(), "test_operation", |_| true).await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let attempt = AtomicUsize::new(0);
        let operation = || async {
            attempt.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("fatal")
        };

        let result =
            retry_with_backoff(operation, fast_config(), "test_operation", |_| false).await;
        assert!(result.is_err());
        assert_eq!(attempt.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let attempt = AtomicUsize::new(0);
        let operation = || async {
            attempt.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("still failing")
        };

        let result =
            retry_with_backoff(operation, fast_config(), "test_operation", |_| true).await;
        assert!(result.is_err());
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }
}
