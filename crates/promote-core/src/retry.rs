//! Bounded exponential backoff for transient SCM failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scm::ScmError;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = no retries, run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))),
        )
    }
}

/// Run `op`, retrying transient [`ScmError`]s. Permanent errors and the last
/// transient error are returned as-is.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ScmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScmError>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = %what,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient SCM failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> ScmError {
        ScmError::Transient {
            message: "503".to_string(),
        }
    }

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = with_retry(&RetryPolicy::default(), "list", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::Relaxed) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_transient_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 10,
        };
        let result: Result<(), _> = with_retry(&policy, "create", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err(transient())
            }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "find", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err(ScmError::NotFound {
                    resource: "org/a#1".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ScmError::NotFound { .. })));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
