use std::future::Future;
use std::time::Duration;

use tracing::info;
use tracing::warn;

use crate::ops::git::CmdResult;

// -----------------------------------------------------------------------------
// RetryPolicy

/// Retry parameters for operations that may fail transiently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every retry.
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay inserted after the given failed attempt (1-based):
    /// `initial_delay * backoff_base^(attempt - 1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .mul_f64(self.backoff_base.powi(attempt.saturating_sub(1) as i32))
    }
}

// -----------------------------------------------------------------------------
// retry_with_backoff

/// Run `command` until it succeeds or every allowed attempt has been used.
///
/// Between failed attempts the delay grows exponentially per `policy`. The
/// last failing [`CmdResult`] is returned as-is; this never turns a failure
/// into an error, so callers decide what a persistent failure means.
pub async fn retry_with_backoff<F, Fut>(policy: &RetryPolicy, mut command: F) -> CmdResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CmdResult>,
{
    // A zero-attempt policy still runs the command once.
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = command().await;

        if result.success {
            if attempt > 1 {
                info!("operation succeeded on attempt {attempt}");
            }
            return result;
        }

        if attempt >= attempts {
            warn!("all {attempts} attempts failed: {}", result.stderr);
            return result;
        }

        let delay = policy.backoff_delay(attempt);
        warn!(
            "attempt {attempt} failed, retrying in {:.1}s: {}",
            delay.as_secs_f64(),
            result.stderr
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            backoff_base: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&quick_policy(3), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                CmdResult::ok("done")
            }
        })
        .await;

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&quick_policy(3), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    CmdResult::failed("connection reset", 128)
                } else {
                    CmdResult::ok("done")
                }
            }
        })
        .await;

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_failure_after_exhaustion() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&quick_policy(4), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                CmdResult::failed("host unreachable", 128)
            }
        })
        .await;

        assert!(!result.success);
        assert_eq!(result.stderr, "host unreachable");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&quick_policy(0), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                CmdResult::failed("nope", 1)
            }
        })
        .await;

        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            backoff_base: 2.0,
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }
}
