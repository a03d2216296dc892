//! # Delay between connection attempts.
//!
//! Both the broker and the store wait a constant delay between connect attempts,
//! so [`BackoffPolicy`] is a fixed delay. A zero delay is rejected by config
//! validation; the policy itself accepts it.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use connvisor::BackoffPolicy;
//!
//! let fixed = BackoffPolicy::fixed(Duration::from_secs(1));
//! assert_eq!(fixed.next(0), Duration::from_secs(1));
//! assert_eq!(fixed.next(7), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Retry delay policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Wait before every retry.
    pub delay: Duration,
}

impl Default for BackoffPolicy {
    /// Returns a constant one-second delay.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    /// Constant delay: every attempt waits exactly `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before retry number `attempt` (0-indexed).
    #[inline]
    pub fn next(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
