//! # Consumer callbacks and channel setup hooks.
//!
//! - [`MessageHandler`]: invoked once per delivery, as its own tracked unit of work.
//! - [`ChannelSetup`]: invoked every time a channel (re)starts, after its handle is
//!   open; the place to declare topology and call [`Channel::consume`].
//!
//! Both have closure adapters ([`HandlerFn`], [`SetupFn`]) that build a fresh
//! future per call.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use connvisor::amqp::{Channel, ConsumeOptions, HandlerFn, SetupFn};
//! use connvisor::HandlerError;
//!
//! let handler = HandlerFn::arc(|span, channel: Arc<Channel>, delivery| async move {
//!     // process delivery.body ...
//!     channel
//!         .ack(span.as_ref(), delivery.envelope.delivery_tag, false)
//!         .await
//!         .map_err(HandlerError::from)
//! });
//!
//! let orders = Channel::builder()
//!     .name("orders")
//!     .on_start(SetupFn::arc(move |channel: Arc<Channel>| {
//!         let handler = handler.clone();
//!         async move {
//!             channel.consume(handler, "orders", ConsumeOptions::default()).await?;
//!             Ok(())
//!         }
//!     }))
//!     .build();
//! assert_eq!(orders.name(), Some("orders"));
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::channel::Channel;
use super::protocol::Delivery;
use crate::error::{ChannelError, HandlerError};
use crate::trace::Span;

/// Consumer callback.
///
/// `span` is the server-kind `amqp:message` span when a tracer is configured; the
/// channel finishes it after `handle` returns. `channel` is the consuming channel,
/// for ack/nack and replies.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Processes one delivery.
    async fn handle(
        &self,
        span: Option<Span>,
        channel: Arc<Channel>,
        delivery: Delivery,
    ) -> Result<(), HandlerError>;
}

/// Closure-backed [`MessageHandler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wraps `f` and returns it as a shared handler.
    pub fn arc<Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Option<Span>, Arc<Channel>, Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Option<Span>, Arc<Channel>, Delivery) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        span: Option<Span>,
        channel: Arc<Channel>,
        delivery: Delivery,
    ) -> Result<(), HandlerError> {
        (self.f)(span, channel, delivery).await
    }
}

/// Hook run by [`Channel::start`] once the channel handle is open.
#[async_trait]
pub trait ChannelSetup: Send + Sync + 'static {
    /// Prepares the freshly opened channel (declare, consume, ...).
    async fn on_start(&self, channel: Arc<Channel>) -> Result<(), ChannelError>;
}

/// Closure-backed [`ChannelSetup`].
pub struct SetupFn<F> {
    f: F,
}

impl<F> SetupFn<F> {
    /// Wraps `f` and returns it as a shared hook.
    pub fn arc<Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Arc<Channel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ChannelError>> + Send + 'static,
    {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut> ChannelSetup for SetupFn<F>
where
    F: Fn(Arc<Channel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ChannelError>> + Send + 'static,
{
    async fn on_start(&self, channel: Arc<Channel>) -> Result<(), ChannelError> {
        (self.f)(channel).await
    }
}
