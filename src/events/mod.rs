//! Runtime events: types and broadcast bus.
//!
//! Components never log directly. They publish [`Event`]s on the [`Bus`] carried by
//! their [`AppContext`](crate::AppContext), and the subscribers registered there
//! (e.g. [`LogWriter`](crate::LogWriter)) decide what to do with them.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `AmqpSupervisor`, `Channel`, `Redis`, `App`, `SubscriberSet` workers.
//! - **Consumers**: the listener spawned by `AppContext::builder().build()`, which fans
//!   out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
