//! # Broker client boundary.
//!
//! The AMQP wire protocol (handshake, framing, heartbeats) belongs to the client
//! library. This module defines the three seams the supervisor needs from it:
//!
//! ```text
//! AmqpConnector ──connect(url, heartbeat, on_error)──► AmqpProtocol
//! AmqpProtocol  ──channel()──────────────────────────► AmqpChannel
//! AmqpChannel   ──basic_consume()────────────────────► Consumer { tag, deliveries }
//! ```
//!
//! An adapter over a concrete client implements these traits; the crate's own
//! tests use in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerError;
use crate::trace::Headers;

/// Invoked by the client library when the connection fails or closes.
///
/// `None` means the connection closed without an error value. The callback must
/// return quickly: the supervisor only records the failure and spawns its
/// reconnect loop.
pub type ErrorCallback = Arc<dyn Fn(Option<BrokerError>) + Send + Sync>;

/// Establishes transport + protocol to the broker.
#[async_trait]
pub trait AmqpConnector: Send + Sync + 'static {
    /// Connects to `url`. Errors on the established connection are reported to `on_error`.
    async fn connect(
        &self,
        url: &str,
        heartbeat: Duration,
        on_error: ErrorCallback,
    ) -> Result<Arc<dyn AmqpProtocol>, BrokerError>;
}

/// An established broker connection.
#[async_trait]
pub trait AmqpProtocol: Send + Sync + 'static {
    /// Opens a new channel on this connection.
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError>;

    /// Closes the connection and its transport.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// One broker channel handle.
#[async_trait]
pub trait AmqpChannel: Send + Sync + 'static {
    /// True while the broker considers the channel open.
    fn is_open(&self) -> bool;

    /// Closes the channel.
    async fn close(&self) -> Result<(), BrokerError>;

    /// Publishes one message.
    async fn basic_publish(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
        properties: &Properties,
        mandatory: bool,
        immediate: bool,
    ) -> Result<(), BrokerError>;

    /// Starts consuming from `queue`.
    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Consumer, BrokerError>;

    /// Cancels the consumer identified by `consumer_tag`.
    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Acknowledges one (or, with `multiple`, all up to) delivery tag.
    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), BrokerError>;

    /// Rejects one (or, with `multiple`, all up to) delivery tag.
    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), BrokerError>;

    /// Declares a queue.
    async fn queue_declare(
        &self,
        queue: &str,
        options: &QueueDeclareOptions,
    ) -> Result<QueueDeclareOk, BrokerError>;

    /// Declares an exchange of type `kind` (`direct`, `fanout`, `topic`, `headers`).
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: &str,
        options: &ExchangeDeclareOptions,
    ) -> Result<ExchangeDeclareOk, BrokerError>;
}

/// Result of `basic_consume`: the broker-assigned tag and the delivery stream.
///
/// The stream ends when the consumer is cancelled or the channel closes.
pub struct Consumer {
    /// Broker-assigned consumer tag.
    pub consumer_tag: String,
    /// Deliveries in broker order.
    pub deliveries: BoxStream<'static, Delivery>,
}

/// One delivered message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delivery {
    /// Message payload.
    pub body: Vec<u8>,
    /// Delivery metadata.
    pub envelope: Envelope,
    /// Message properties.
    pub properties: Properties,
}

/// Delivery metadata assigned by the broker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Tag of the consumer the message was delivered to.
    pub consumer_tag: String,
    /// Opaque handle used by ack/nack.
    pub delivery_tag: u64,
    /// Exchange the message was published to (empty for the default exchange).
    pub exchange_name: String,
    /// Routing key used at publish time.
    pub routing_key: String,
    /// True if this is a redelivery.
    pub redelivered: bool,
}

/// Basic message properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Application headers; trace context travels here.
    pub headers: Headers,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Per-message TTL in milliseconds, as a string.
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

/// Options of `basic_consume`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Requested consumer tag; empty lets the broker choose.
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: Headers,
}

/// Options of `queue_declare`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: Headers,
}

/// Reply to `queue_declare`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueDeclareOk {
    /// Queue name (broker-generated when declared with an empty name).
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Options of `exchange_declare`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: Headers,
}

/// Reply to `exchange_declare`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeDeclareOk {
    pub exchange: String,
}
