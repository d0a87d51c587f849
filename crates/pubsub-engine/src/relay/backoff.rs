//! Exponential reconnect backoff.

use std::time::Duration;

/// Default first reconnect delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default reconnect delay ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Reconnect delay parameters.
///
/// `delay = min(base * 2^attempts, max_delay)`, where `attempts` is the
/// number of reconnects already scheduled since the last successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            max_delay: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl BackoffConfig {
    /// Delay for the given attempt count.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        // 2^31 seconds is already far past any sane cap
        let factor = 1u32.checked_shl(attempts.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
