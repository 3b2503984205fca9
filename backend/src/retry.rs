//! Retry policy for outbound calls to the identity provider and the
//! completion service.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Bounded retry with jittered exponential backoff.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_ms: u64,
    pub factor: f64,
    pub jitter: f64,
    pub cap_ms: u64,
}

impl Default for RetryPolicy {
    /// One retry after roughly 200ms.
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 2,
            base_ms: 200,
            factor: 2.0,
            jitter: 0.2,
            cap_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt number `attempt` (0-based; attempt 0 runs immediately).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1) as f64;
        let mut delay = (self.base_ms as f64) * self.factor.powf(exp);
        if delay > self.cap_ms as f64 {
            delay = self.cap_ms as f64;
        }
        if self.jitter > 0.0 {
            let jitter = rand::thread_rng().gen_range(-self.jitter..self.jitter);
            delay *= 1.0 + jitter;
        }
        Duration::from_millis(delay.max(0.0).round() as u64)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts && is_transient(&e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "{} failed, retrying", what);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
