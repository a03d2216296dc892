//! # Application context shared by all components.
//!
//! [`AppContext`] replaces process-wide loggers and tracers: every component gets a
//! clone at construction and reports through it.
//!
//! - [`AppContext::log_info`] / [`AppContext::log_err`] publish log events on the bus;
//! - [`AppContext::tracer`] is the optional span factory (`None` disables tracing).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use connvisor::{AppContext, LogWriter, Subscribe};
//! use connvisor::trace::Tracer;
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let provider = SdkTracerProvider::builder().build();
//! let ctx = AppContext::builder()
//!     .with_subscribers(vec![Arc::new(LogWriter::new()) as Arc<dyn Subscribe>])
//!     .with_tracer(Tracer::new(&provider, "billing"))
//!     .build();
//!
//! ctx.log_info("starting");
//! # }
//! ```

use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::trace::Tracer;

/// Handles injected into every component.
#[derive(Clone, Debug)]
pub struct AppContext {
    bus: Bus,
    tracer: Option<Tracer>,
}

impl AppContext {
    /// Starts building a context.
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Event bus shared by all components.
    #[inline]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Span factory, if tracing is enabled.
    #[inline]
    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Publishes a runtime event.
    #[inline]
    pub fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }

    /// Logs an informational message.
    pub fn log_info(&self, message: impl Into<Arc<str>>) {
        self.bus
            .publish(Event::new(EventKind::Info).with_reason(message));
    }

    /// Logs an error that was handled by the caller.
    pub fn log_err(&self, err: &dyn Display) {
        self.bus
            .publish(Event::new(EventKind::Error).with_reason(err.to_string()));
    }
}

/// Builder for [`AppContext`].
pub struct AppContextBuilder {
    bus_capacity: usize,
    subscribers: Vec<Arc<dyn Subscribe>>,
    tracer: Option<Tracer>,
}

impl AppContextBuilder {
    fn new() -> Self {
        Self {
            bus_capacity: 1024,
            subscribers: Vec::new(),
            tracer: None,
        }
    }

    /// Sets the event bus ring buffer size (min 1). Default: 1024.
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Sets event subscribers (logging, metrics, ...).
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Enables tracing.
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Builds the context.
    ///
    /// With subscribers configured this spawns the fan-out listener and therefore
    /// must run inside a tokio runtime; without subscribers it spawns nothing.
    pub fn build(self) -> AppContext {
        let bus = Bus::new(self.bus_capacity);
        if !self.subscribers.is_empty() {
            let set = SubscriberSet::new(self.subscribers, bus.clone());
            spawn_listener(&bus, set);
        }
        AppContext {
            bus,
            tracer: self.tracer,
        }
    }
}

/// Forwards bus events to the subscriber set until every bus handle is dropped.
fn spawn_listener(bus: &Bus, set: SubscriberSet) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}
