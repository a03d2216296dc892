//! # Scoped pool connection.
//!
//! [`ConnectionScope`] holds one connection acquired from the pool and gives it
//! back when dropped, whichever way the scope is left (`?`, early return, panic).

use std::fmt::Debug;
use std::sync::Arc;

use super::pool::{StoreConnection, StorePool, Value};
use crate::error::StoreError;
use crate::trace::{Span, SpanKind};

const REMOTE: &str = "redis";

/// A pooled connection, released on drop.
pub struct ConnectionScope {
    pool: Arc<dyn StorePool>,
    conn: Option<Box<dyn StoreConnection>>,
}

impl std::fmt::Debug for ConnectionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionScope")
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl ConnectionScope {
    /// Acquires a connection, traced as `redis:Acquire` under `span`.
    pub(crate) async fn acquire(
        pool: Arc<dyn StorePool>,
        span: Option<&Span>,
    ) -> Result<Self, StoreError> {
        let span = span.map(|parent| {
            let span = parent
                .new_child("redis:Acquire", SpanKind::Client)
                .remote_endpoint(REMOTE);
            span.tag("redis.size_before", pool.size());
            span.tag("redis.free_before", pool.free_size());
            span
        });

        let result = pool.acquire().await;
        let conn = finish(span, result)?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    /// Executes `command`, traced as `redis:{id}` under `span`. Never retried.
    pub async fn execute(
        &self,
        span: Option<&Span>,
        id: &str,
        command: &str,
        args: &[Value],
    ) -> Result<Value, StoreError> {
        let span = command_span(span, id, "redis.command", command, args);
        let result = match self.conn() {
            Ok(conn) => conn.execute(command, args).await,
            Err(e) => Err(e),
        };
        finish(span, result)
    }

    /// Executes a pub/sub `command` on `channels`, traced as `redis:{id}` under `span`.
    pub async fn execute_pubsub(
        &self,
        span: Option<&Span>,
        id: &str,
        command: &str,
        channels: &[String],
    ) -> Result<Vec<Value>, StoreError> {
        let span = command_span(span, id, "redis.pubsub", command, channels);
        let result = match self.conn() {
            Ok(conn) => conn.execute_pubsub(command, channels).await,
            Err(e) => Err(e),
        };
        finish(span, result)
    }

    /// Channels the held connection is subscribed to.
    pub fn pubsub_channels(&self) -> Vec<String> {
        self.conn
            .as_deref()
            .map(|c| c.pubsub_channels())
            .unwrap_or_default()
    }

    fn conn(&self) -> Result<&dyn StoreConnection, StoreError> {
        self.conn.as_deref().ok_or(StoreError::PoolUnavailable)
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

fn command_span(
    parent: Option<&Span>,
    id: &str,
    tag: &'static str,
    command: &str,
    args: &(impl Debug + ?Sized),
) -> Option<Span> {
    parent.map(|parent| {
        let span = parent
            .new_child(format!("redis:{id}"), SpanKind::Client)
            .remote_endpoint(REMOTE);
        span.tag(tag, command);
        span.annotate(format!("{args:?}"));
        span
    })
}

fn finish<T>(span: Option<Span>, result: Result<T, StoreError>) -> Result<T, StoreError> {
    if let Some(span) = span {
        match &result {
            Ok(_) => span.finish(),
            Err(e) => span.finish_with_error(e),
        }
    }
    result
}
