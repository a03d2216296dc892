//! # Retry budget for connection attempts.
//!
//! The initial connect made by `prepare()` has a finite budget: running out of it
//! means the service is misconfigured or absent, and startup must abort. A
//! disconnect after startup is treated as transient, so the reconnect loop retries
//! without a bound. Both share the same [`BackoffPolicy`].

use std::time::Duration;

use super::BackoffPolicy;

/// How many attempts a retry loop may make.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempts {
    /// At most `n` attempts.
    Bounded(u32),
    /// Retry forever.
    Unbounded,
}

impl Attempts {
    /// True if attempt number `attempt` (1-based) is still within budget.
    #[inline]
    pub fn allows(&self, attempt: u32) -> bool {
        match self {
            Attempts::Bounded(n) => attempt <= *n,
            Attempts::Unbounded => true,
        }
    }
}

/// Attempt budget paired with the delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt budget.
    pub attempts: Attempts,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// At most `max_attempts` attempts, `delay` apart.
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: Attempts::Bounded(max_attempts),
            backoff: BackoffPolicy::fixed(delay),
        }
    }

    /// Unlimited attempts, `delay` apart.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            attempts: Attempts::Unbounded,
            backoff: BackoffPolicy::fixed(delay),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.next(attempt.saturating_sub(1))
    }
}
