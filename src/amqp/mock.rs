//! In-memory broker used by the amqp tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::channel::ChannelLink;
use super::protocol::{
    AmqpChannel, AmqpConnector, AmqpProtocol, ConsumeOptions, Consumer, Delivery, Envelope,
    ErrorCallback, ExchangeDeclareOk, ExchangeDeclareOptions, Properties, QueueDeclareOk,
    QueueDeclareOptions,
};
use crate::config::DRAIN_TIMEOUT;
use crate::context::AppContext;
use crate::error::BrokerError;

#[derive(Clone, Debug)]
pub(crate) struct Published {
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) properties: Properties,
}

#[derive(Default)]
struct BrokerState {
    calls: Vec<String>,
    channels: Vec<Arc<MockChannel>>,
    consumers: HashMap<String, (String, mpsc::UnboundedSender<Delivery>)>,
    published: Vec<Published>,
    fail_publish: Option<BrokerError>,
    fail_declare: Option<BrokerError>,
    fail_ack: Option<BrokerError>,
    connect_failures: u32,
    connect_attempts: u32,
    connections: u32,
    on_error: Option<ErrorCallback>,
    next_tag: u64,
    next_delivery: u64,
}

/// Shared broker state; connectors, protocols and channels all record into it.
#[derive(Default)]
pub(crate) struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    /// A connector recording into this broker.
    pub(crate) fn connector(self: &Arc<Self>) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            broker: Arc::clone(self),
        })
    }

    /// A link over a fresh connection, for tests that drive a channel directly.
    pub(crate) fn link(self: &Arc<Self>, ctx: &AppContext) -> ChannelLink {
        ChannelLink {
            protocol: Arc::new(MockProtocol {
                broker: Arc::clone(self),
            }),
            ctx: ctx.clone(),
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub(crate) fn fail_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    pub(crate) fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub(crate) fn connections(&self) -> u32 {
        self.lock().connections
    }

    /// Invokes the error callback of the latest connection, as a dropped socket would.
    ///
    /// Consumers registered on the lost connection are gone.
    pub(crate) fn drop_connection(&self) {
        let cb = {
            let mut st = self.lock();
            st.consumers.clear();
            st.on_error.clone()
        };
        if let Some(cb) = cb {
            cb(Some(BrokerError::new("connection reset by peer")));
        }
    }

    pub(crate) fn fail_publish(&self, err: BrokerError) {
        self.lock().fail_publish = Some(err);
    }

    pub(crate) fn fail_declare(&self, err: BrokerError) {
        self.lock().fail_declare = Some(err);
    }

    /// Fails the next ack or nack.
    pub(crate) fn fail_ack(&self, err: BrokerError) {
        self.lock().fail_ack = Some(err);
    }

    /// Pushes a delivery to the current consumer of `queue`.
    pub(crate) fn deliver(&self, queue: &str, mut delivery: Delivery) {
        let mut st = self.lock();
        st.next_delivery += 1;
        delivery.envelope.delivery_tag = st.next_delivery;
        if delivery.envelope.routing_key.is_empty() {
            delivery.envelope.routing_key = queue.to_string();
        }
        let (_, tx) = st.consumers.get(queue).expect("no consumer for queue");
        tx.send(delivery).expect("consumer stream dropped");
    }

    pub(crate) fn has_consumer(&self, queue: &str) -> bool {
        self.lock().consumers.contains_key(queue)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub(crate) fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// When the `i`-th opened channel handle was closed.
    pub(crate) fn channel_closed_at(&self, i: usize) -> Option<Instant> {
        let ch = self.lock().channels.get(i).cloned()?;
        *ch.closed_at.lock().unwrap()
    }

    /// Marks the `i`-th channel handle closed without going through `close()`.
    pub(crate) fn close_channel_remotely(&self, i: usize) {
        if let Some(ch) = self.lock().channels.get(i) {
            ch.open.store(false, Ordering::SeqCst);
        }
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }
}

pub(crate) struct MockConnector {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl AmqpConnector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        _heartbeat: Duration,
        on_error: ErrorCallback,
    ) -> Result<Arc<dyn AmqpProtocol>, BrokerError> {
        let mut st = self.broker.lock();
        st.connect_attempts += 1;
        st.calls.push(format!("connect {url}"));
        if st.connect_failures > 0 {
            st.connect_failures -= 1;
            return Err(BrokerError::new("connection refused"));
        }
        st.connections += 1;
        st.on_error = Some(on_error);
        Ok(Arc::new(MockProtocol {
            broker: Arc::clone(&self.broker),
        }))
    }
}

struct MockProtocol {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl AmqpProtocol for MockProtocol {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        let mut st = self.broker.lock();
        let ch = Arc::new(MockChannel {
            id: st.channels.len(),
            broker: Arc::clone(&self.broker),
            open: AtomicBool::new(true),
            closed_at: Mutex::new(None),
        });
        st.channels.push(ch.clone());
        st.calls.push(format!("channel {}", ch.id));
        Ok(ch)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.record("close connection".to_string());
        Ok(())
    }
}

struct MockChannel {
    id: usize,
    broker: Arc<MockBroker>,
    open: AtomicBool,
    closed_at: Mutex<Option<Instant>>,
}

impl MockChannel {
    /// A channel-level error reply closes the channel on the broker side.
    fn closed_by_broker(&self) {
        self.open.store(false, Ordering::SeqCst);
        *self.closed_at.lock().unwrap() = Some(Instant::now());
    }
}

#[async_trait]
impl AmqpChannel for MockChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.open.store(false, Ordering::SeqCst);
        *self.closed_at.lock().unwrap() = Some(Instant::now());
        self.broker.record(format!("close channel {}", self.id));
        Ok(())
    }

    async fn basic_publish(
        &self,
        payload: &[u8],
        exchange: &str,
        routing_key: &str,
        properties: &Properties,
        _mandatory: bool,
        _immediate: bool,
    ) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        if let Some(err) = st.fail_publish.take() {
            return Err(err);
        }
        st.published.push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
            properties: properties.clone(),
        });
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<Consumer, BrokerError> {
        let mut st = self.broker.lock();
        st.next_tag += 1;
        let consumer_tag = if options.consumer_tag.is_empty() {
            format!("ctag-{}", st.next_tag)
        } else {
            options.consumer_tag.clone()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        st.consumers
            .insert(queue.to_string(), (consumer_tag.clone(), tx));
        st.calls.push(format!("basic_consume {queue} on {}", self.id));

        let deliveries =
            futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|d| (d, rx)) })
                .boxed();
        Ok(Consumer {
            consumer_tag,
            deliveries,
        })
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        st.consumers.retain(|_, (tag, _)| tag != consumer_tag);
        st.calls.push(format!("basic_cancel {consumer_tag}"));
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        if let Some(err) = st.fail_ack.take() {
            return Err(err);
        }
        st.calls.push(format!("basic_ack {delivery_tag} {multiple}"));
        Ok(())
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let mut st = self.broker.lock();
        if let Some(err) = st.fail_ack.take() {
            return Err(err);
        }
        st.calls
            .push(format!("basic_nack {delivery_tag} {multiple} {requeue}"));
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        _options: &QueueDeclareOptions,
    ) -> Result<QueueDeclareOk, BrokerError> {
        let failure = self.broker.lock().fail_declare.take();
        if let Some(err) = failure {
            if err.code.is_some() {
                self.closed_by_broker();
            }
            return Err(err);
        }
        Ok(QueueDeclareOk {
            queue: queue.to_string(),
            ..QueueDeclareOk::default()
        })
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        _kind: &str,
        _options: &ExchangeDeclareOptions,
    ) -> Result<ExchangeDeclareOk, BrokerError> {
        let failure = self.broker.lock().fail_declare.take();
        if let Some(err) = failure {
            if err.code.is_some() {
                self.closed_by_broker();
            }
            return Err(err);
        }
        Ok(ExchangeDeclareOk {
            exchange: exchange.to_string(),
        })
    }
}

pub(crate) fn delivery_for(body: Vec<u8>, properties: Properties) -> Delivery {
    Delivery {
        body,
        envelope: Envelope::default(),
        properties,
    }
}

/// Polls `cond` until it holds, yielding to other tasks in between.
pub(crate) async fn wait_until(cond: impl Fn() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
