//! # Reconnection policy for broker disconnects.
//!
//! [`RetryPolicy`] controls how a runner backs off after losing its broker
//! connection. It is parameterized by:
//! - [`RetryPolicy::max_retries`] the retry budget per disconnect episode;
//! - [`RetryPolicy::backoff`] the linear delay unit.
//!
//! The delay before attempt `n` (1-indexed) is `n × backoff`. The growth is
//! deliberately linear and deterministic: disconnect recovery wants a short,
//! predictable ramp, and exhausting the budget degrades to a logged no-op
//! rather than a crash.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use jobvisor::RetryPolicy;
//!
//! let retry = RetryPolicy {
//!     max_retries: 4,
//!     backoff: Duration::from_secs(2),
//! };
//!
//! assert_eq!(retry.delay(1), Duration::from_secs(2));
//! assert_eq!(retry.delay(3), Duration::from_secs(6));
//! ```

use std::time::Duration;

/// Bounded linear backoff for reconnect attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries allowed before giving up on the current episode.
    pub max_retries: u32,
    /// Delay unit; attempt `n` sleeps `n × backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    /// Returns a policy with `max_retries = 6` and `backoff = 1s`
    /// (worst case ≈ 21s of sleeping per episode).
    fn default() -> Self {
        Self {
            max_retries: 6,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Computes the sleep before the given attempt number (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}
