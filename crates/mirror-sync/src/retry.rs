use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::SyncError;

/// Bounded exponential backoff for transient endpoint failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub limit: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Sleep for the backoff delay plus up to 10% jitter.
    pub async fn wait(&self, retry: u32) {
        let delay = self.backoff_delay(retry);
        let jitter_ms = (delay.as_millis() / 10) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        tokio::time::sleep(delay + jitter).await;
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// retry limit is spent.
pub async fn retrying<T, F, Fut>(policy: &RetryPolicy, op: &str, mut call: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < policy.limit => {
                attempt += 1;
                tracing::warn!(op, attempt, error = %e, "retrying");
                policy.wait(attempt).await;
            }
            result => return result,
        }
    }
}

/// Bound one network call. An elapsed timer counts as an unreachable
/// endpoint so callers retry it like any other transient failure.
pub async fn with_timeout<T, F>(limit: Duration, op: &str, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::EndpointUnreachable(format!(
            "{op} timed out after {}s",
            limit.as_secs_f64()
        ))),
    }
}
