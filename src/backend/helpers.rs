//! Retry helper shared by backend callers.

use crate::backend::traits::BackendResult;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn next_delay(&self, delay_ms: u64) -> u64 {
        let scaled = (delay_ms as f64 * self.backoff_multiplier.max(1.0)).round();
        // f64 -> u64 casts saturate
        (scaled as u64).min(self.max_delay_ms)
    }
}

/// Retry an async operation with exponential backoff.
///
/// Only errors whose kind [`is_transient`](crate::backend::ErrorKind::is_transient)
/// are retried; anything else is returned immediately. `what` names the
/// operation in log lines.
///
/// # Errors
///
/// Returns the last error once `max_attempts` is reached, or the first
/// non-transient error.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> BackendResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms,
                    error = %err,
                    "{what} failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = config.next_delay(delay_ms);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let cfg = fast();
        assert_eq!(cfg.next_delay(1), 2);
        assert_eq!(cfg.next_delay(2), 4);
        assert_eq!(cfg.next_delay(4), 4);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(&fast(), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BackendError::new(ErrorKind::Network, "reset"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let out: BackendResult<()> = retry_with_backoff(&fast(), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::new(ErrorKind::Rejected, "nope"))
        })
        .await;
        assert_eq!(out.unwrap_err().kind, ErrorKind::Rejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let out: BackendResult<()> = retry_with_backoff(&fast(), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::new(ErrorKind::Timeout, "slow"))
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
