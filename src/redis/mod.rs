//! # Key-value store component.
//!
//! - [`Redis`]: the supervised component owning the connection pool.
//! - [`ConnectionScope`]: one pooled connection, returned to the pool on drop.
//! - [`pool`]: the client-library seam ([`StoreConnector`], [`StorePool`],
//!   [`StoreConnection`]) and the [`Value`] type.
//! - `RedisConnector` (feature `redis-client`): the seam implemented over `redis`.
//!
//! ## Example
//! ```no_run
//! # use connvisor::redis::{Redis, Value};
//! # use connvisor::trace::Span;
//! # async fn demo(redis: &Redis, span: &Span) -> Result<(), connvisor::StoreError> {
//! let conn = redis.connection(Some(span)).await?;
//! conn.execute(Some(span), "load-user", "HGETALL", &["user:1".into()]).await?;
//! conn.execute(Some(span), "touch-user", "EXPIRE", &["user:1".into(), Value::Int(60)]).await?;
//! // `conn` goes back to the pool here
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "redis-client")]
mod client;
pub mod pool;
mod scope;
mod store;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "redis-client")]
pub use client::RedisConnector;
pub use pool::{StoreConnection, StoreConnector, StorePool, Value};
pub use scope::ConnectionScope;
pub use store::Redis;
