//! # Store adapter over the `redis` client.
//!
//! Enabled with the `redis-client` feature. [`RedisConnector`] builds a
//! semaphore-bounded pool of multiplexed connections; each pooled connection
//! opens its own pub/sub connection on first use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ::redis::aio::{MultiplexedConnection, PubSub};
use ::redis::{Client, Cmd, RedisError};
use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};

use super::pool::{StoreConnection, StoreConnector, StorePool, Value};
use crate::error::StoreError;

/// Creates pools through the `redis` client.
#[derive(Clone, Copy, Debug, Default)]
pub struct RedisConnector;

impl RedisConnector {
    /// Shared connector, ready to hand to [`Redis::new`](super::Redis::new).
    pub fn arc() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn create_pool(
        &self,
        dsn: &str,
        min_size: usize,
        max_size: usize,
    ) -> Result<Arc<dyn StorePool>, StoreError> {
        let client = Client::open(dsn).map_err(|e| connection_error(&e))?;
        let pool = ClientPool::new(client, max_size);
        for _ in 0..min_size {
            let conn = pool.open().await?;
            lock(&pool.idle).push(conn);
        }
        Ok(Arc::new(pool))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ClientPool {
    client: Client,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn StoreConnection>>>,
    size: watch::Sender<usize>,
    closed: AtomicBool,
}

impl ClientPool {
    fn new(client: Client, max_size: usize) -> Self {
        let (size, _) = watch::channel(0);
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(Vec::new()),
            size,
            closed: AtomicBool::new(false),
        }
    }

    async fn open(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| connection_error(&e))?;
        self.size.send_modify(|n| *n += 1);
        Ok(Box::new(ClientConnection {
            client: self.client.clone(),
            conn,
            pubsub: tokio::sync::Mutex::new(None),
            channels: Mutex::new(Vec::new()),
        }))
    }

    fn discard(&self, count: usize) {
        self.size.send_modify(|n| *n = n.saturating_sub(count));
    }
}

#[async_trait]
impl StorePool for ClientPool {
    fn size(&self) -> usize {
        *self.size.borrow()
    }

    fn free_size(&self) -> usize {
        lock(&self.idle).len()
    }

    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolUnavailable)?;

        let idle = lock(&self.idle).pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.open().await?,
        };
        // returned by `release`
        permit.forget();
        Ok(conn)
    }

    fn release(&self, conn: Box<dyn StoreConnection>) {
        if self.closed.load(Ordering::Acquire) {
            drop(conn);
            self.discard(1);
            return;
        }
        lock(&self.idle).push(conn);
        self.permits.add_permits(1);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let idle = std::mem::take(&mut *lock(&self.idle));
        self.discard(idle.len());
    }

    async fn wait_closed(&self) {
        let mut size = self.size.subscribe();
        let _ = size.wait_for(|n| *n == 0).await;
    }
}

struct ClientConnection {
    client: Client,
    conn: MultiplexedConnection,
    pubsub: tokio::sync::Mutex<Option<PubSub>>,
    channels: Mutex<Vec<String>>,
}

#[async_trait]
impl StoreConnection for ClientConnection {
    async fn execute(&self, command: &str, args: &[Value]) -> Result<Value, StoreError> {
        let mut cmd = ::redis::cmd(command);
        for arg in args {
            push_arg(&mut cmd, arg);
        }
        let mut conn = self.conn.clone();
        let reply: ::redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(from_redis(reply))
    }

    async fn execute_pubsub(
        &self,
        command: &str,
        channels: &[String],
    ) -> Result<Vec<Value>, StoreError> {
        let command = command.to_ascii_uppercase();
        let mut guard = self.pubsub.lock().await;
        let pubsub = match guard.take() {
            Some(pubsub) => guard.insert(pubsub),
            None => guard.insert(
                self.client
                    .get_async_pubsub()
                    .await
                    .map_err(|e| connection_error(&e))?,
            ),
        };

        let mut replies = Vec::with_capacity(channels.len());
        for channel in channels {
            let (outcome, subscribing) = match command.as_str() {
                "SUBSCRIBE" => (pubsub.subscribe(channel.as_str()).await, true),
                "PSUBSCRIBE" => (pubsub.psubscribe(channel.as_str()).await, true),
                "UNSUBSCRIBE" => (pubsub.unsubscribe(channel.as_str()).await, false),
                "PUNSUBSCRIBE" => (pubsub.punsubscribe(channel.as_str()).await, false),
                other => {
                    return Err(StoreError::Command(format!(
                        "{other} is not a pub/sub command"
                    )));
                }
            };
            outcome.map_err(|e| command_error(&e))?;

            let mut subscribed = lock(&self.channels);
            if subscribing {
                if !subscribed.contains(channel) {
                    subscribed.push(channel.clone());
                }
            } else {
                subscribed.retain(|c| c != channel);
            }
            replies.push(Value::Bulk(vec![
                command.to_ascii_lowercase().into(),
                channel.clone().into(),
                Value::Int(subscribed.len() as i64),
            ]));
        }
        Ok(replies)
    }

    fn pubsub_channels(&self) -> Vec<String> {
        lock(&self.channels).clone()
    }
}

fn push_arg(cmd: &mut Cmd, value: &Value) {
    match value {
        Value::Nil => {
            cmd.arg("");
        }
        Value::Int(n) => {
            cmd.arg(*n);
        }
        Value::Data(bytes) => {
            cmd.arg(bytes.as_slice());
        }
        Value::Status(s) => {
            cmd.arg(s.as_str());
        }
        Value::Bulk(items) => {
            for item in items {
                push_arg(cmd, item);
            }
        }
    }
}

fn from_redis(value: ::redis::Value) -> Value {
    match value {
        ::redis::Value::Nil => Value::Nil,
        ::redis::Value::Int(n) => Value::Int(n),
        ::redis::Value::BulkString(bytes) => Value::Data(bytes),
        ::redis::Value::SimpleString(s) => Value::Status(s),
        ::redis::Value::Okay => Value::Status("OK".to_string()),
        ::redis::Value::Boolean(b) => Value::Int(i64::from(b)),
        ::redis::Value::Array(items) | ::redis::Value::Set(items) => {
            Value::Bulk(items.into_iter().map(from_redis).collect())
        }
        ::redis::Value::Map(pairs) => Value::Bulk(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [from_redis(k), from_redis(v)])
                .collect(),
        ),
        other => Value::Data(format!("{other:?}").into_bytes()),
    }
}

fn connection_error(err: &RedisError) -> StoreError {
    StoreError::Connection(err.to_string())
}

/// Transport failures stay connection errors; anything else is the server
/// rejecting the command.
fn command_error(err: &RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        connection_error(err)
    } else {
        StoreError::Command(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_map_onto_values() {
        let reply = ::redis::Value::Array(vec![
            ::redis::Value::Okay,
            ::redis::Value::BulkString(b"v".to_vec()),
            ::redis::Value::Nil,
            ::redis::Value::Map(vec![(
                ::redis::Value::SimpleString("k".into()),
                ::redis::Value::Int(7),
            )]),
        ]);
        assert_eq!(
            from_redis(reply),
            Value::Bulk(vec![
                Value::Status("OK".into()),
                Value::Data(b"v".to_vec()),
                Value::Nil,
                Value::Bulk(vec![Value::Status("k".into()), Value::Int(7)]),
            ])
        );
    }

    #[test]
    fn test_bulk_arguments_are_flattened() {
        let mut cmd = ::redis::cmd("MSET");
        push_arg(
            &mut cmd,
            &Value::Bulk(vec!["a".into(), Value::Int(1), "b".into(), Value::Int(2)]),
        );
        assert_eq!(cmd.args_iter().count(), 5);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_and_settles() {
        // opening a client does not connect, so an empty pool needs no server
        let pool = RedisConnector
            .create_pool("redis://127.0.0.1:1/0", 0, 2)
            .await
            .unwrap();
        assert_eq!(pool.size(), 0);

        pool.close();
        pool.wait_closed().await;
        assert!(matches!(
            pool.acquire().await,
            Err(StoreError::PoolUnavailable)
        ));
    }
}
