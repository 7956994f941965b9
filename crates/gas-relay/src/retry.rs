//! Retry policy with exponential backoff for RPC reads and funding submissions.

use rand::Rng;
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

/// Returns true for errors that usually go away on their own: dropped
/// connections, timeouts, rate limiting and gateway errors.
pub fn is_transient_error(err: &eyre::Report) -> bool {
    let msg = format!("{err:#}").to_lowercase();
    msg.contains("connection")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("429")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("temporarily unavailable")
        || msg.contains("network")
        || msg.contains("reset by peer")
        || msg.contains("broken pipe")
        || msg.contains("eof")
}

/// How many times to retry an operation and how long to wait in between.
///
/// The policy is a plain value so that callers (and tests) decide it up
/// front instead of relying on a global helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` runs the operation exactly once.
    pub max_retries: usize,
    /// Delay before the first retry; doubled for every further attempt.
    pub initial_delay: Duration,
    /// Upper bound for a single delay, before jitter.
    pub max_delay: Duration,
    /// Add up to 25% random jitter to every delay.
    pub jitter: bool,
    /// Only retry errors accepted by [`is_transient_error`].
    pub transient_only: bool,
}

impl RetryPolicy {
    /// Policy for read-only RPC calls: up to 10 retries of transient errors.
    pub const fn rpc() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
            transient_only: true,
        }
    }

    /// Policy for funding submissions: every error is retried `max_retries` times.
    pub const fn funding(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
            transient_only: false,
        }
    }

    /// Retries every error without sleeping.
    pub const fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            transient_only: false,
        }
    }

    /// Total number of attempts this policy allows.
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay to wait after the failed attempt number `attempt` (zero based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(1u32 << attempt.min(10))
            .min(self.max_delay);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let max_jitter = base.as_millis() as u64 / 4;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
    }

    fn should_retry(&self, err: &eyre::Report) -> bool {
        !self.transient_only || is_transient_error(err)
    }

    /// Runs `f` until it succeeds, the error is not retryable, or the
    /// attempts are used up. The last error is returned.
    pub async fn retry<F, Fut, T>(&self, operation: &str, f: F) -> eyre::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = eyre::Result<T>>,
    {
        self.retry_if(operation, f, |_| true).await
    }

    /// Like [`retry`](Self::retry), but an error for which `retryable`
    /// returns false ends the loop immediately.
    pub async fn retry_if<F, Fut, T, P>(
        &self,
        operation: &str,
        mut f: F,
        retryable: P,
    ) -> eyre::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = eyre::Result<T>>,
        P: Fn(&eyre::Report) -> bool,
    {
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !self.should_retry(&err) || !retryable(&err) {
                        debug!(
                            %operation,
                            error = %err,
                            "Non-transient error, not retrying"
                        );
                        return Err(err);
                    }

                    if attempt >= self.max_retries {
                        warn!(
                            %operation,
                            attempts = attempt + 1,
                            error = %err,
                            "Max retries exceeded"
                        );
                        return Err(err);
                    }

                    let delay = self.delay(attempt);
                    warn!(
                        %operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::rpc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transient_errors_are_classified() {
        assert!(is_transient_error(&eyre::eyre!("connection refused")));
        assert!(is_transient_error(&eyre::eyre!("HTTP error 429 Too Many Requests")));
        assert!(is_transient_error(&eyre::eyre!("request timed out")));
        assert!(!is_transient_error(&eyre::eyre!("execution reverted")));
        assert!(!is_transient_error(&eyre::eyre!("insufficient funds for gas")));
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
            transient_only: true,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::rpc();
        for attempt in 0..5 {
            let base = RetryPolicy { jitter: false, ..policy }.delay(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = RetryPolicy::immediate(3)
            .retry("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    eyre::bail!("boom");
                }
                Ok(7)
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let err = RetryPolicy::immediate(3)
            .retry("always-fails", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(eyre::eyre!("boom"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn transient_only_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            transient_only: true,
            ..RetryPolicy::immediate(5)
        };
        let _ = policy
            .retry("reverted", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(eyre::eyre!("execution reverted"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn predicate_stops_retrying() {
        let calls = AtomicUsize::new(0);
        let err = RetryPolicy::immediate(5)
            .retry_if(
                "send",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(eyre::eyre!("already broadcast"))
                },
                |err| !err.to_string().contains("broadcast"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "already broadcast");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_is_retried_with_backoff() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::rpc()
        };
        let started = tokio::time::Instant::now();
        policy
            .retry("head", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    eyre::bail!("connection reset by peer");
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
