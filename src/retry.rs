// src/retry.rs
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time;
use tracing::warn;

use crate::error::BundlerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is one more.
    pub max_retries: u32,
    /// Wait before the first retry, doubled for each one after it.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added on top of the capped backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (zero-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        // Grab a new rng each time because we can't hold it across awaits.
        rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of retries. The last error is returned on exhaustion.
pub async fn with_retries<Func, Fut, Out>(
    description: &str,
    policy: &RetryPolicy,
    mut op: Func,
) -> Result<Out, BundlerError>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<Out, BundlerError>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(out) => return Ok(out),
            Err(error) if error.is_retryable() && retry < policy.max_retries => {
                let wait = policy.backoff(retry) + policy.jitter();
                retry += 1;
                warn!(
                    "Retryable error for {description} ({error}), attempt {retry}/{}; retrying in {}ms",
                    policy.max_retries,
                    wait.as_millis()
                );
                time::sleep(wait).await;
            }
            Err(error) => return Err(error),
        }
    }
}
