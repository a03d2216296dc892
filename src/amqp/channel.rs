//! # Channel: one broker channel with its consumer and in-flight callbacks.
//!
//! A [`Channel`] wraps a broker channel handle obtained from the supervisor's
//! current connection. It owns at most one consumer registration and tracks every
//! consumer callback it dispatched, so that [`Channel::stop`] can wait for them.
//!
//! ## Lifecycle
//! ```text
//! attach(link) ─► start() ─► open() ─► on_start hook ─► consume(handler, queue)
//!                                                          │
//!                   deliveries ─► dispatch loop ─► TaskTracker::spawn(unit)
//!                                                          │
//! stop() ─► cancel consumer ─► tracker.close() ─► wait (≤ drain timeout) ─► close handle
//! ```
//!
//! ## Rules
//! - Dispatch order equals arrival order; completion order is unconstrained.
//! - Deliveries arriving while the handle is closed are skipped.
//! - `stop()` never cancels running callbacks. It waits for them up to the drain
//!   timeout and then closes the handle regardless.
//! - Handler errors are reported as [`EventKind::HandlerFailed`] and tagged on the
//!   span. Panics are reported the same way and then resumed on the unit's task.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::handler::{ChannelSetup, MessageHandler};
use super::protocol::{
    AmqpChannel, AmqpProtocol, ConsumeOptions, Delivery, ExchangeDeclareOk,
    ExchangeDeclareOptions, Properties, QueueDeclareOk, QueueDeclareOptions,
};
use crate::context::AppContext;
use crate::error::{BrokerError, ChannelError, HandlerError};
use crate::events::{Event, EventKind};
use crate::subscribers::panic_message;
use crate::trace::{Span, SpanKind, propagation};

const COMPONENT: &str = "amqp";

/// Options of [`Channel::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishOptions {
    /// Return the message if it cannot be routed.
    pub mandatory: bool,
    /// Return the message if it cannot be delivered immediately.
    pub immediate: bool,
    /// Inject the caller's trace context into the message headers.
    pub propagate_trace: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            mandatory: false,
            immediate: false,
            propagate_trace: true,
        }
    }
}

/// What a channel needs from its supervisor: the current connection and the
/// application context. Replaced on every (re)connect.
#[derive(Clone)]
pub(crate) struct ChannelLink {
    pub(crate) protocol: Arc<dyn AmqpProtocol>,
    pub(crate) ctx: AppContext,
    pub(crate) drain_timeout: Duration,
}

/// A handler bound to a queue.
struct ConsumerRegistration {
    handler: Arc<dyn MessageHandler>,
    queue: String,
    options: ConsumeOptions,
}

struct ActiveConsumer {
    tag: String,
    registration: ConsumerRegistration,
    dispatcher: JoinHandle<()>,
}

#[derive(Default)]
struct ChannelState {
    link: Option<ChannelLink>,
    handle: Option<Arc<dyn AmqpChannel>>,
    consumer: Option<ActiveConsumer>,
}

/// One supervised broker channel.
///
/// Build with [`Channel::builder`] and hand it to
/// [`AmqpSupervisor::new`](super::AmqpSupervisor::new).
pub struct Channel {
    name: Option<Arc<str>>,
    setup: Option<Arc<dyn ChannelSetup>>,
    state: RwLock<ChannelState>,
    stopping: AtomicBool,
    inflight: TaskTracker,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("stopping", &self.is_stopping())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Channel {
    /// Starts building a channel.
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::default()
    }

    /// Optional unique name.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of consumer callbacks currently running.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// True between `stop()` and the next `start()`.
    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// True if the channel holds an open broker handle.
    pub async fn is_open(&self) -> bool {
        let st = self.state.read().await;
        st.handle.as_ref().is_some_and(|h| h.is_open())
    }

    /// Tag of the active consumer, if any.
    pub async fn consumer_tag(&self) -> Option<String> {
        let st = self.state.read().await;
        st.consumer.as_ref().map(|c| c.tag.clone())
    }

    /// Queue consumed by the active consumer, if any.
    pub async fn consumer_queue(&self) -> Option<String> {
        let st = self.state.read().await;
        st.consumer.as_ref().map(|c| c.registration.queue.clone())
    }

    /// Options the active consumer was registered with, if any.
    pub async fn consumer_options(&self) -> Option<ConsumeOptions> {
        let st = self.state.read().await;
        st.consumer.as_ref().map(|c| c.registration.options.clone())
    }

    pub(crate) async fn attach(&self, link: ChannelLink) {
        self.state.write().await.link = Some(link);
    }

    /// Opens a fresh broker handle from the current connection.
    ///
    /// A previously held handle is closed first; failures to close it are logged.
    pub async fn open(&self) -> Result<(), ChannelError> {
        let mut st = self.state.write().await;
        let link = st.link.clone().ok_or(ChannelError::NotConnected)?;

        if let Some(old) = st.handle.take() {
            self.close_handle(&link.ctx, old).await;
        }
        st.handle = Some(link.protocol.channel().await?);
        Ok(())
    }

    /// Opens the channel and runs its setup hook.
    ///
    /// Any consumer left over from a previous connection is discarded; the setup
    /// hook is expected to register it again.
    pub async fn start(self: &Arc<Self>) -> Result<(), ChannelError> {
        self.stopping.store(false, Ordering::Release);
        self.inflight.reopen();

        if let Some(stale) = self.state.write().await.consumer.take() {
            stale.dispatcher.abort();
        }
        self.open().await?;

        if let Some(setup) = &self.setup {
            setup.on_start(Arc::clone(self)).await?;
        }

        let ctx = self.ctx().await?;
        ctx.publish(self.event(EventKind::ChannelStarted));
        Ok(())
    }

    /// Stops consuming, drains in-flight callbacks and closes the handle.
    ///
    /// Waits at most the drain timeout for running callbacks; they are not
    /// cancelled. The handle is closed in every case.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);

        let (link, handle, consumer) = {
            let mut st = self.state.write().await;
            (st.link.clone(), st.handle.clone(), st.consumer.take())
        };
        let Some(link) = link else {
            return;
        };

        if let Some(consumer) = consumer {
            if let Some(handle) = &handle {
                if let Err(e) = handle.basic_cancel(&consumer.tag).await {
                    link.ctx.publish(
                        self.event(EventKind::ConsumerCancelFailed)
                            .with_reason(format!("tag={} error={e}", consumer.tag)),
                    );
                }
            }
            consumer.dispatcher.abort();
        }

        self.inflight.close();
        if !self.inflight.is_empty()
            && tokio::time::timeout(link.drain_timeout, self.inflight.wait())
                .await
                .is_err()
        {
            link.ctx.publish(
                self.event(EventKind::DrainTimedOut)
                    .with_timeout(link.drain_timeout)
                    .with_reason(format!("{} callbacks still running", self.in_flight())),
            );
        }

        if let Err(e) = self.close().await {
            link.ctx.publish(
                self.event(EventKind::CleanupFailed)
                    .with_reason(e.to_string()),
            );
        }
        link.ctx.publish(self.event(EventKind::ChannelStopped));
    }

    /// Closes the broker handle if it is open.
    pub async fn close(&self) -> Result<(), ChannelError> {
        let handle = self.state.write().await.handle.take();
        match handle {
            Some(h) if h.is_open() => h.close().await.map_err(ChannelError::from),
            _ => Ok(()),
        }
    }

    /// Registers `handler` as the consumer of `queue` and starts dispatching.
    ///
    /// Returns the consumer tag assigned by the broker.
    pub async fn consume(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler>,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<String, ChannelError> {
        let mut st = self.state.write().await;
        if let Some(active) = &st.consumer {
            return Err(ChannelError::AlreadyConsuming {
                tag: active.tag.clone(),
            });
        }
        let handle = st.handle.clone().ok_or(ChannelError::NotOpen)?;
        let ctx = st
            .link
            .as_ref()
            .map(|l| l.ctx.clone())
            .ok_or(ChannelError::NotConnected)?;

        let consumer = handle.basic_consume(queue, &options).await?;
        let registration = ConsumerRegistration {
            handler,
            queue: queue.to_string(),
            options,
        };
        let dispatcher = spawn_dispatcher(
            Arc::downgrade(self),
            ctx,
            handle,
            registration.handler.clone(),
            consumer.deliveries,
        );

        st.consumer = Some(ActiveConsumer {
            tag: consumer.consumer_tag.clone(),
            registration,
            dispatcher,
        });
        Ok(consumer.consumer_tag)
    }

    /// Publishes `payload` to `exchange` with `routing_key`.
    ///
    /// With a context `span` the publish is traced as a client span
    /// `amqp:publish {exchange} {routing_key}` and, if `options.propagate_trace`,
    /// the context span is merged into the message headers, so the consumer
    /// continues the caller's trace.
    pub async fn publish(
        &self,
        span: Option<&Span>,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
        properties: Option<Properties>,
        options: PublishOptions,
    ) -> Result<(), ChannelError> {
        let mut properties = properties.unwrap_or_default();
        let span = span.map(|parent| {
            if options.propagate_trace {
                propagation::inject_into(parent.context(), &mut properties.headers);
            }
            parent.new_child(
                format!("amqp:publish {exchange} {routing_key}"),
                SpanKind::Client,
            )
        });

        let result = async {
            let handle = self.handle().await?;
            handle
                .basic_publish(
                    payload,
                    exchange,
                    routing_key,
                    &properties,
                    options.mandatory,
                    options.immediate,
                )
                .await
                .map_err(ChannelError::from)
        }
        .await;
        finish_span(span, result)
    }

    /// Acknowledges `delivery_tag` (all up to it with `multiple`).
    pub async fn ack(
        &self,
        span: Option<&Span>,
        delivery_tag: u64,
        multiple: bool,
    ) -> Result<(), ChannelError> {
        let span = span.map(|p| p.new_child("amqp:ack", SpanKind::Client));
        let result = async {
            let handle = self.handle().await?;
            handle
                .basic_ack(delivery_tag, multiple)
                .await
                .map_err(ChannelError::from)
        }
        .await;
        finish_span(span, result)
    }

    /// Rejects `delivery_tag` (all up to it with `multiple`), optionally requeueing.
    pub async fn nack(
        &self,
        span: Option<&Span>,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), ChannelError> {
        let span = span.map(|p| p.new_child("amqp:nack", SpanKind::Client));
        let result = async {
            let handle = self.handle().await?;
            handle
                .basic_nack(delivery_tag, multiple, requeue)
                .await
                .map_err(ChannelError::from)
        }
        .await;
        finish_span(span, result)
    }

    /// Declares a queue on a throwaway handle.
    ///
    /// Returns `Ok(None)` if the queue exists with different attributes (reply 406),
    /// which would otherwise close the shared handle.
    pub async fn safe_declare_queue(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<Option<QueueDeclareOk>, ChannelError> {
        let (ctx, scratch) = self.scratch_handle().await?;
        let result = scratch.queue_declare(queue, &options).await;
        self.close_scratch(&ctx, scratch).await;
        swallow_mismatch(result)
    }

    /// Declares an exchange of type `kind` on a throwaway handle.
    ///
    /// Returns `Ok(None)` on attribute mismatch (reply 406).
    pub async fn safe_declare_exchange(
        &self,
        exchange: &str,
        kind: &str,
        options: ExchangeDeclareOptions,
    ) -> Result<Option<ExchangeDeclareOk>, ChannelError> {
        let (ctx, scratch) = self.scratch_handle().await?;
        let result = scratch.exchange_declare(exchange, kind, &options).await;
        self.close_scratch(&ctx, scratch).await;
        swallow_mismatch(result)
    }

    /// Declares a queue on this channel's handle. Attribute mismatches fail and close it.
    pub async fn declare_queue(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<QueueDeclareOk, ChannelError> {
        let handle = self.handle().await?;
        Ok(handle.queue_declare(queue, &options).await?)
    }

    /// Declares an exchange on this channel's handle. Attribute mismatches fail and close it.
    pub async fn declare_exchange(
        &self,
        exchange: &str,
        kind: &str,
        options: ExchangeDeclareOptions,
    ) -> Result<ExchangeDeclareOk, ChannelError> {
        let handle = self.handle().await?;
        Ok(handle.exchange_declare(exchange, kind, &options).await?)
    }

    async fn handle(&self) -> Result<Arc<dyn AmqpChannel>, ChannelError> {
        let st = self.state.read().await;
        st.handle.clone().ok_or(ChannelError::NotOpen)
    }

    async fn ctx(&self) -> Result<AppContext, ChannelError> {
        let st = self.state.read().await;
        st.link
            .as_ref()
            .map(|l| l.ctx.clone())
            .ok_or(ChannelError::NotConnected)
    }

    async fn scratch_handle(&self) -> Result<(AppContext, Arc<dyn AmqpChannel>), ChannelError> {
        let link = self
            .state
            .read()
            .await
            .link
            .clone()
            .ok_or(ChannelError::NotConnected)?;
        let scratch = link.protocol.channel().await?;
        Ok((link.ctx, scratch))
    }

    async fn close_scratch(&self, ctx: &AppContext, scratch: Arc<dyn AmqpChannel>) {
        if scratch.is_open() {
            self.close_handle(ctx, scratch).await;
        }
    }

    async fn close_handle(&self, ctx: &AppContext, handle: Arc<dyn AmqpChannel>) {
        if let Err(e) = handle.close().await {
            ctx.publish(
                self.event(EventKind::CleanupFailed)
                    .with_reason(e.to_string()),
            );
        }
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_component(COMPONENT)
            .with_channel(self.name.clone())
    }

    /// Spawns one tracked unit of work for `delivery`.
    fn dispatch(
        self: &Arc<Self>,
        ctx: &AppContext,
        handle: &Arc<dyn AmqpChannel>,
        handler: &Arc<dyn MessageHandler>,
        delivery: Delivery,
    ) {
        if !handle.is_open() {
            return;
        }
        let span = ctx.tracer().map(|tracer| {
            let headers = &delivery.properties.headers;
            let debug = propagation::parse_debug(headers);
            let span = match propagation::extract(headers) {
                Some(remote) => tracer.join_span(remote, "amqp:message", SpanKind::Server, debug),
                None => tracer.new_trace(
                    "amqp:message",
                    SpanKind::Server,
                    propagation::parse_sampled(headers),
                    debug,
                ),
            };
            tag_delivery(&span, &delivery);
            span
        });

        self.inflight.spawn(run_unit(
            Arc::clone(self),
            ctx.clone(),
            Arc::clone(handler),
            span,
            delivery,
        ));
    }
}

/// Builder for [`Channel`].
#[derive(Default)]
pub struct ChannelBuilder {
    name: Option<Arc<str>>,
    setup: Option<Arc<dyn ChannelSetup>>,
}

impl ChannelBuilder {
    /// Names the channel. Names must be unique within one supervisor.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the hook run after every (re)start.
    pub fn on_start(mut self, setup: Arc<dyn ChannelSetup>) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Builds the channel.
    pub fn build(self) -> Arc<Channel> {
        Arc::new(Channel {
            name: self.name,
            setup: self.setup,
            state: RwLock::new(ChannelState::default()),
            stopping: AtomicBool::new(false),
            inflight: TaskTracker::new(),
        })
    }
}

fn spawn_dispatcher(
    channel: Weak<Channel>,
    ctx: AppContext,
    handle: Arc<dyn AmqpChannel>,
    handler: Arc<dyn MessageHandler>,
    mut deliveries: futures::stream::BoxStream<'static, Delivery>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = deliveries.next().await {
            let Some(channel) = channel.upgrade() else {
                break;
            };
            channel.dispatch(&ctx, &handle, &handler, delivery);
        }
    })
}

async fn run_unit(
    channel: Arc<Channel>,
    ctx: AppContext,
    handler: Arc<dyn MessageHandler>,
    span: Option<Span>,
    delivery: Delivery,
) -> Result<(), HandlerError> {
    let failed = |reason: String| {
        Event::new(EventKind::HandlerFailed)
            .with_component(COMPONENT)
            .with_channel(channel.name.clone())
            .with_reason(reason)
    };

    let fut = handler.handle(span.clone(), Arc::clone(&channel), delivery);
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {
            if let Some(span) = &span {
                span.finish();
            }
            Ok(())
        }
        Ok(Err(e)) => {
            if let Some(span) = &span {
                span.finish_with_error(&e);
            }
            ctx.publish(failed(e.to_string()));
            Err(e)
        }
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            if let Some(span) = &span {
                span.finish_with_message(format!("panic: {msg}"));
            }
            ctx.publish(failed(format!("panic: {msg}")));
            std::panic::resume_unwind(panic)
        }
    }
}

fn tag_delivery(span: &Span, delivery: &Delivery) {
    let envelope = &delivery.envelope;
    if !envelope.routing_key.is_empty() {
        span.tag("amqp.routing_key", &envelope.routing_key);
    }
    if !envelope.exchange_name.is_empty() {
        span.tag("amqp.exchange_name", &envelope.exchange_name);
    }
    if let Some(mode) = delivery.properties.delivery_mode {
        span.tag("amqp.delivery_mode", mode);
    }
    if let Some(expiration) = &delivery.properties.expiration {
        span.tag("amqp.expiration", expiration);
    }
}

fn finish_span<T>(span: Option<Span>, result: Result<T, ChannelError>) -> Result<T, ChannelError> {
    if let Some(span) = span {
        match &result {
            Ok(_) => span.finish(),
            Err(e) => span.finish_with_error(e),
        }
    }
    result
}

fn swallow_mismatch<T>(result: Result<T, BrokerError>) -> Result<Option<T>, ChannelError> {
    match result {
        Ok(ok) => Ok(Some(ok)),
        Err(e) if e.is_attribute_mismatch() => Ok(None),
        Err(e) => Err(e.into()),
    }
}
