//! # Broker adapter over the `lapin` client.
//!
//! Enabled with the `lapin` feature. [`LapinConnector`] is the production
//! [`AmqpConnector`]; everything else in this module maps between the crate's
//! message types and lapin's.
//!
//! The configured heartbeat is written into the URI query (`heartbeat=<secs>`),
//! replacing any value already there.

use std::sync::Arc;
use std::time::Duration;

use ::lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, ExchangeDeclareOptions as LapinExchangeOptions,
    QueueDeclareOptions as LapinQueueOptions,
};
use ::lapin::types::{AMQPValue, FieldTable, ShortString};
use ::lapin::{BasicProperties, ConnectionProperties, ExchangeKind};
use async_trait::async_trait;
use futures::StreamExt;
use url::Url;

use super::protocol::{
    AmqpChannel, AmqpConnector, AmqpProtocol, ConsumeOptions, Consumer, Delivery, Envelope,
    ErrorCallback, ExchangeDeclareOk, ExchangeDeclareOptions, Properties, QueueDeclareOk,
    QueueDeclareOptions,
};
use crate::error::BrokerError;
use crate::trace::Headers;

/// Reply code sent with a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Connects through `lapin`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LapinConnector;

impl LapinConnector {
    /// Shared connector, ready to hand to [`AmqpSupervisor::new`](super::AmqpSupervisor::new).
    pub fn arc() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(
        &self,
        url: &str,
        heartbeat: Duration,
        on_error: ErrorCallback,
    ) -> Result<Arc<dyn AmqpProtocol>, BrokerError> {
        let uri = with_heartbeat(url, heartbeat)?;
        let conn = ::lapin::Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| broker_error(&e))?;
        conn.on_error(move |err| on_error(Some(broker_error(&err))));
        Ok(Arc::new(LapinConnection { inner: conn }))
    }
}

struct LapinConnection {
    inner: ::lapin::Connection,
}

#[async_trait]
impl AmqpProtocol for LapinConnection {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        let inner = self
            .inner
            .create_channel()
            .await
            .map_err(|e| broker_error(&e))?;
        Ok(Arc::new(LapinChannel { inner }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.inner.status().connected() {
            return Ok(());
        }
        self.inner
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|e| broker_error(&e))
    }
}

struct LapinChannel {
    inner: ::lapin::Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|e| broker_error(&e))
    }

    async fn basic_publish(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
        properties: &Properties,
        mandatory: bool,
        immediate: bool,
    ) -> Result<(), BrokerError> {
        let confirm = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory,
                    immediate,
                },
                payload,
                to_lapin_properties(properties),
            )
            .await
            .map_err(|e| broker_error(&e))?;
        confirm.await.map_err(|e| broker_error(&e))?;
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Consumer, BrokerError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: options.no_wait,
                },
                to_field_table(&options.arguments),
            )
            .await
            .map_err(|e| broker_error(&e))?;

        let consumer_tag = consumer.tag().as_str().to_string();
        let tag = consumer_tag.clone();
        // a delivery error ends the stream; the connection error callback reports it
        let deliveries = consumer
            .take_while(|d| futures::future::ready(d.is_ok()))
            .filter_map(move |d| {
                let tag = tag.clone();
                futures::future::ready(d.ok().map(|d| from_lapin_delivery(d, tag)))
            })
            .boxed();
        Ok(Consumer {
            consumer_tag,
            deliveries,
        })
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| broker_error(&e))
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), BrokerError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
            .map_err(|e| broker_error(&e))
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        self.inner
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
            .map_err(|e| broker_error(&e))
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: &QueueDeclareOptions,
    ) -> Result<QueueDeclareOk, BrokerError> {
        let declared = self
            .inner
            .queue_declare(
                queue,
                LapinQueueOptions {
                    passive: options.passive,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: options.no_wait,
                },
                to_field_table(&options.arguments),
            )
            .await
            .map_err(|e| broker_error(&e))?;
        Ok(QueueDeclareOk {
            queue: declared.name().as_str().to_string(),
            message_count: declared.message_count(),
            consumer_count: declared.consumer_count(),
        })
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: &str,
        options: &ExchangeDeclareOptions,
    ) -> Result<ExchangeDeclareOk, BrokerError> {
        self.inner
            .exchange_declare(
                exchange,
                exchange_kind(kind),
                LapinExchangeOptions {
                    passive: options.passive,
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    internal: false,
                    nowait: options.no_wait,
                },
                to_field_table(&options.arguments),
            )
            .await
            .map_err(|e| broker_error(&e))?;
        Ok(ExchangeDeclareOk {
            exchange: exchange.to_string(),
        })
    }
}

/// Maps a lapin failure, keeping the reply code of protocol errors.
fn broker_error(err: &::lapin::Error) -> BrokerError {
    match err {
        ::lapin::Error::ProtocolError(e) => {
            BrokerError::closed(e.get_id(), e.get_message().as_str())
        }
        other => BrokerError::new(other.to_string()),
    }
}

fn with_heartbeat(url: &str, heartbeat: Duration) -> Result<String, BrokerError> {
    let mut uri = Url::parse(url).map_err(|e| BrokerError::new(format!("invalid url: {e}")))?;
    let kept: Vec<(String, String)> = uri
        .query_pairs()
        .filter(|(k, _)| k != "heartbeat")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    uri.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("heartbeat", &heartbeat.as_secs().to_string());
    Ok(uri.into())
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(value.clone().into()),
        );
    }
    table
}

/// Keeps string and integer values; other field types carry no trace context
/// and are dropped.
fn from_field_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::ShortString(s) => s.as_str().to_string(),
                AMQPValue::Boolean(b) => b.to_string(),
                AMQPValue::ShortInt(n) => n.to_string(),
                AMQPValue::LongInt(n) => n.to_string(),
                AMQPValue::LongLongInt(n) => n.to_string(),
                _ => return None,
            };
            Some((key.as_str().to_string(), value))
        })
        .collect()
}

fn short(value: &Option<String>) -> Option<ShortString> {
    value.clone().map(ShortString::from)
}

fn to_lapin_properties(p: &Properties) -> BasicProperties {
    let mut props = BasicProperties::default();
    if let Some(v) = short(&p.content_type) {
        props = props.with_content_type(v);
    }
    if let Some(v) = short(&p.content_encoding) {
        props = props.with_content_encoding(v);
    }
    if !p.headers.is_empty() {
        props = props.with_headers(to_field_table(&p.headers));
    }
    if let Some(v) = p.delivery_mode {
        props = props.with_delivery_mode(v);
    }
    if let Some(v) = p.priority {
        props = props.with_priority(v);
    }
    if let Some(v) = short(&p.correlation_id) {
        props = props.with_correlation_id(v);
    }
    if let Some(v) = short(&p.reply_to) {
        props = props.with_reply_to(v);
    }
    if let Some(v) = short(&p.expiration) {
        props = props.with_expiration(v);
    }
    if let Some(v) = short(&p.message_id) {
        props = props.with_message_id(v);
    }
    if let Some(v) = p.timestamp {
        props = props.with_timestamp(v);
    }
    if let Some(v) = short(&p.message_type) {
        props = props.with_type(v);
    }
    if let Some(v) = short(&p.user_id) {
        props = props.with_user_id(v);
    }
    if let Some(v) = short(&p.app_id) {
        props = props.with_app_id(v);
    }
    props
}

fn from_lapin_properties(p: &BasicProperties) -> Properties {
    let text = |v: &Option<ShortString>| v.as_ref().map(|s| s.as_str().to_string());
    Properties {
        content_type: text(p.content_type()),
        content_encoding: text(p.content_encoding()),
        headers: p.headers().as_ref().map(from_field_table).unwrap_or_default(),
        delivery_mode: *p.delivery_mode(),
        priority: *p.priority(),
        correlation_id: text(p.correlation_id()),
        reply_to: text(p.reply_to()),
        expiration: text(p.expiration()),
        message_id: text(p.message_id()),
        timestamp: *p.timestamp(),
        message_type: text(p.kind()),
        user_id: text(p.user_id()),
        app_id: text(p.app_id()),
    }
}

fn from_lapin_delivery(d: ::lapin::message::Delivery, consumer_tag: String) -> Delivery {
    Delivery {
        envelope: Envelope {
            consumer_tag,
            delivery_tag: d.delivery_tag,
            exchange_name: d.exchange.as_str().to_string(),
            routing_key: d.routing_key.as_str().to_string(),
            redelivered: d.redelivered,
        },
        properties: from_lapin_properties(&d.properties),
        body: d.data,
    }
}
