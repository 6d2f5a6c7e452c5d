//! Retry loop with exponential backoff for flaky external commands
//! (registry pulls, certificate issuance).

use std::time::Duration;

use crate::error::{DeployError, Result};

/// Sleeps between attempts. Tests substitute a recording fake so retry
/// timing is checked without waiting.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_seconds: u64) -> Self {
        Self { attempts: attempts.max(1), backoff: Duration::from_secs(backoff_seconds) }
    }

    /// Delay after failed attempt `n` (1-based): `backoff * 2^(n-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

/// Run `op` up to `policy.attempts` times, sleeping between attempts only.
/// Interruption stops the loop immediately; other failures retry and
/// surface as [`DeployError::RetriesExhausted`] once attempts run out.
pub fn run_with_retry<T>(
    label: &str,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let mut last = String::new();
    for attempt in 1..=policy.attempts {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(DeployError::Interrupted) => return Err(DeployError::Interrupted),
            Err(err) => {
                last = err.to_string();
                if attempt < policy.attempts {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        label,
                        attempt,
                        attempts = policy.attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    sleeper.sleep(delay);
                }
            }
        }
    }
    Err(DeployError::RetriesExhausted {
        command: label.to_owned(),
        attempts: policy.attempts,
        last,
    })
}
