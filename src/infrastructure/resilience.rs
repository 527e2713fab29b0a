//! Bounded retry with exponential backoff for scan engine calls
//!
//! The polling scheduler retries transient poll failures a bounded number
//! of times within a cycle; after the attempts are exhausted the failure is
//! a no-op for that cycle and the job is simply not updated this round.

use std::time::Duration;

use tracing::debug;

use crate::application::errors::TrackError;

/// Retry configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Execute an operation with exponential backoff on retryable errors.
///
/// Non-retryable errors (not-found, 4xx, credit rejections) are returned
/// immediately without another attempt.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, TrackError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TrackError>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempts >= config.max_attempts || !error.is_retryable() {
                    return Err(error);
                }

                debug!(
                    attempt = attempts,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Retrying scan engine call"
                );

                tokio::time::sleep(delay).await;

                delay = std::cmp::min(
                    Duration::from_millis(
                        (delay.as_millis() as f64 * config.backoff_multiplier) as u64,
                    ),
                    config.max_delay,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&fast_config(5), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TrackError::Api(ApiError::Http {
                        status: 500,
                        message: "Internal Server Error".into(),
                    }))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry_with_backoff(&fast_config(2), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TrackError::Network("connection reset".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_never_retried() {
        let counter = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = retry_with_backoff(&fast_config(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TrackError::NotFound { job_id: "J4".into() })
            }
        })
        .await;

        assert!(matches!(result, Err(TrackError::NotFound { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
