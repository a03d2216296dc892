//! # Store client boundary.
//!
//! The wire protocol and the pool implementation belong to the client library.
//! The component needs a connector that builds a bounded pool, the pool itself,
//! and pooled connections that execute commands.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// Command argument or reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Null reply.
    Nil,
    /// Integer.
    Int(i64),
    /// Binary-safe string.
    Data(Vec<u8>),
    /// Status reply (`OK`, `PONG`, ...).
    Status(String),
    /// Array.
    Bulk(Vec<Value>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Data(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Data(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Data(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// Creates connection pools.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Builds a pool of `min_size..=max_size` connections to `dsn`.
    async fn create_pool(
        &self,
        dsn: &str,
        min_size: usize,
        max_size: usize,
    ) -> Result<Arc<dyn StorePool>, StoreError>;
}

/// A bounded connection pool.
#[async_trait]
pub trait StorePool: Send + Sync + 'static {
    /// Connections currently held by the pool (free and in use).
    fn size(&self) -> usize;

    /// Connections currently idle.
    fn free_size(&self) -> usize;

    /// Waits for a free connection.
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError>;

    /// Returns a connection to the pool.
    fn release(&self, conn: Box<dyn StoreConnection>);

    /// Starts closing every connection.
    fn close(&self);

    /// Waits until `close` has finished.
    async fn wait_closed(&self);
}

/// One pooled connection.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Executes `command` with `args`.
    async fn execute(&self, command: &str, args: &[Value]) -> Result<Value, StoreError>;

    /// Executes a pub/sub command (`SUBSCRIBE`, `PSUBSCRIBE`, ...) on `channels`.
    async fn execute_pubsub(
        &self,
        command: &str,
        channels: &[String],
    ) -> Result<Vec<Value>, StoreError>;

    /// Channels this connection is subscribed to.
    fn pubsub_channels(&self) -> Vec<String>;
}
