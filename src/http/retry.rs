//! Retry policy for the HTTP Core: at most N attempts with
//! linear or exponential delay capped at `maxDelay`, retrying only on
//! connection refused, timeout, reset, no-such-host, 429, or 5xx.

use std::time::Duration;

use tracing::debug;

use crate::context::Context;
use crate::error::GzhError;

#[derive(Debug, Clone, Copy)]
pub enum BackoffKind {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub kind: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            kind: BackoffKind::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let computed = match self.kind {
            BackoffKind::Linear => self.base_delay * attempt.max(1),
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor.max(1))
            }
        };
        computed.min(self.max_delay)
    }

    /// Runs `attempt` up to `max_attempts` times, sleeping between attempts
    /// (honoring cancellation) while the error reports `retryable()`.
    pub async fn run<F, Fut, T>(&self, ctx: &Context, mut attempt_fn: F) -> Result<T, GzhError>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, GzhError>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            if ctx.is_cancelled() {
                return Err(GzhError::Cancelled);
            }
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after error");
                    ctx.run(tokio::time::sleep(delay)).await?;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(GzhError::Network("retry loop exhausted".into())))
    }
}

/// HTTP status codes that count as retryable: rate-limited or a server error.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            kind: BackoffKind::Exponential,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            kind: BackoffKind::Linear,
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn run_retries_retryable_errors_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            kind: BackoffKind::Linear,
        };
        let ctx = Context::new();
        let mut calls = 0;
        let result = policy
            .run(&ctx, |attempt| {
                calls += 1;
                async move {
                    if attempt < 3 {
                        Err(GzhError::Network("connection reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::default();
        let ctx = Context::new();
        let mut calls = 0;
        let result: Result<(), GzhError> = policy
            .run(&ctx, |_| {
                calls += 1;
                async { Err(GzhError::InvalidCommand("nope".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[rstest]
    #[case(429, true)]
    #[case(500, true)]
    #[case(503, true)]
    #[case(599, true)]
    #[case(404, false)]
    #[case(200, false)]
    #[case(600, false)]
    fn status_retryability_classifies_known_codes(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(is_retryable_status(status), expected);
    }
}
