//! Connect and reconnect retry policies.
//!
//! ## Contents
//! - [`RetryPolicy`] how many connect attempts to make and how long to wait in between
//! - [`Attempts`]    bounded budget (startup) or unbounded (post-startup reconnect)
//! - [`BackoffPolicy`] the constant delay between attempts
//!
//! ## Quick wiring
//! ```text
//! AmqpConfig / RedisConfig
//!      └─► prepare()    uses RetryPolicy { attempts: Bounded(connect_max_attempts), .. }
//!      └─► reconnect()  uses RetryPolicy { attempts: Unbounded, .. }
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::fixed(1s)`: every wait is one second.
//! - `Attempts::Bounded(10)`.

mod backoff;
mod retry;

pub use backoff::BackoffPolicy;
pub use retry::{Attempts, RetryPolicy};
