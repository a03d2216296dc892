//! # Key-value store component.
//!
//! [`Redis`] creates the connection pool in `prepare()` (bounded retries, like the
//! broker's initial connect) and closes it in `stop()`. Commands run on a
//! [`ConnectionScope`] obtained from [`Redis::connection`].

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::pool::{StoreConnector, StorePool, Value};
use super::scope::ConnectionScope;
use crate::app::Component;
use crate::config::RedisConfig;
use crate::context::AppContext;
use crate::error::{ComponentError, ConfigError, StoreError};
use crate::events::{Event, EventKind};
use crate::trace::Span;

const COMPONENT: &str = "redis";

/// Pooled key-value store client.
pub struct Redis {
    cfg: RedisConfig,
    target: String,
    ctx: AppContext,
    connector: Arc<dyn StoreConnector>,
    pool: RwLock<Option<Arc<dyn StorePool>>>,
}

impl std::fmt::Debug for Redis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redis")
            .field("target", &self.target)
            .field("pool_min_size", &self.cfg.pool_min_size)
            .field("pool_max_size", &self.cfg.pool_max_size)
            .finish()
    }
}

impl Redis {
    /// Creates the component. Fails on invalid pool bounds or attempt budget.
    pub fn new(
        cfg: RedisConfig,
        connector: Arc<dyn StoreConnector>,
        ctx: AppContext,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            target: cfg.masked_dsn(),
            cfg,
            ctx,
            connector,
            pool: RwLock::new(None),
        })
    }

    /// Creates the pool with bounded retries.
    pub async fn prepare(&self) -> Result<(), ComponentError> {
        let policy = self.cfg.prepare_policy();
        let mut attempt = 0u32;
        while policy.attempts.allows(attempt + 1) {
            attempt += 1;
            self.ctx
                .publish(self.event(EventKind::Connecting).with_attempt(attempt));

            match self
                .connector
                .create_pool(&self.cfg.dsn, self.cfg.pool_min_size, self.cfg.pool_max_size)
                .await
            {
                Ok(pool) => {
                    *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
                    self.ctx
                        .publish(self.event(EventKind::Connected).with_attempt(attempt));
                    return Ok(());
                }
                Err(e) => self.ctx.publish(
                    self.event(EventKind::ConnectFailed)
                        .with_attempt(attempt)
                        .with_reason(e.to_string()),
                ),
            }
            tokio::time::sleep(policy.delay_after(attempt)).await;
        }
        Err(ComponentError::Connect {
            target: self.target.clone(),
            attempts: attempt,
        })
    }

    /// Closes the pool and waits for it to finish closing.
    pub async fn stop(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close();
            pool.wait_closed().await;
            self.ctx.publish(self.event(EventKind::Disconnected));
        }
    }

    /// Acquires a pooled connection, traced as `redis:Acquire` under `span`.
    pub async fn connection(&self, span: Option<&Span>) -> Result<ConnectionScope, StoreError> {
        ConnectionScope::acquire(self.pool()?, span).await
    }

    /// Acquires a connection, executes one command and releases the connection.
    pub async fn execute(
        &self,
        span: Option<&Span>,
        id: &str,
        command: &str,
        args: &[Value],
    ) -> Result<Value, StoreError> {
        let scope = self.connection(span).await?;
        scope.execute(span, id, command, args).await
    }

    fn pool(&self) -> Result<Arc<dyn StorePool>, StoreError> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::PoolUnavailable)
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_component(COMPONENT)
            .with_target(self.target.as_str())
    }
}

#[async_trait]
impl Component for Redis {
    fn name(&self) -> &str {
        COMPONENT
    }

    async fn prepare(&self) -> Result<(), ComponentError> {
        Redis::prepare(self).await
    }

    async fn start(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        Redis::stop(self).await;
        Ok(())
    }
}
