use std::{future::Future, time::Duration};

use anyhow::Result;
use tracing::warn;

use super::clock::Clock;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// `base * attempt`
    Linear,
    /// `base * factor^(attempt - 1)`
    Exponential { factor: u32 },
}

/// Bounded retry. `max_retries` doesn't include the first attempt, so an operation is tried at
/// most `max_retries + 1` times.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Linear,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay before retry number `attempt` (starting at 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential { factor } => self
                .base_delay
                .saturating_mul(factor.saturating_pow(attempt - 1)),
        };
        delay.min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted. The closure receives the
/// zero based attempt number. The last error is returned on failure.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, clock: &dyn Clock, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!("Attempt {attempt} failed, retrying in {delay:?}: {e:?}");
                clock.sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
