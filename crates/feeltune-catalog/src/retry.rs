//! Bounded retry with exponential backoff for catalog calls.

use crate::client::CatalogError;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry strategy: `max_attempts` calls in total, waiting `initial_delay`
/// before the second and doubling before each further one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// runs out of attempts. The last error is returned on failure.
    pub fn run<T>(
        &self,
        sleeper: &dyn Sleeper,
        what: &str,
        mut op: impl FnMut() -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_transient() => {
                    let delay = self.delay_before(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f32(),
                        error = %e,
                        "catalog call failed, retrying"
                    );
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(what, attempt, error = %e, "catalog call failed, giving up");
                    return Err(e);
                }
            }
        }
    }
}
