//! # Span: one traced operation.
//!
//! A [`Span`] is a cheap, cloneable handle over an OpenTelemetry context holding
//! the started span. Clones refer to the same operation, so a span can be handed
//! to a consumer callback while the dispatcher keeps a handle to finish it
//! afterwards. Ending is idempotent: only the first `finish*` call is exported.

use std::borrow::Cow;
use std::error::Error as StdError;

use opentelemetry::trace::{SpanContext, SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};

use super::tracer::Tracer;

/// Handle to a started span.
#[derive(Clone, Debug)]
pub struct Span {
    tracer: Tracer,
    cx: Context,
}

impl Span {
    pub(crate) fn new(tracer: Tracer, cx: Context) -> Self {
        Self { tracer, cx }
    }

    /// Context carrying this span, usable as a parent or for propagation.
    #[inline]
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Identifiers of this span.
    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    /// Tracer that started this span.
    #[inline]
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Starts a child span.
    pub fn new_child(&self, name: impl Into<Cow<'static, str>>, kind: SpanKind) -> Span {
        self.tracer.new_child(&self.cx, name, kind)
    }

    /// Records the remote service name (`peer.service`).
    pub fn remote_endpoint(self, service: impl Into<String>) -> Self {
        self.tag("peer.service", service.into());
        self
    }

    /// Sets a string attribute.
    pub fn tag(&self, key: &'static str, value: impl ToString) {
        self.cx
            .span()
            .set_attribute(KeyValue::new(key, value.to_string()));
    }

    /// Adds a timestamped event.
    pub fn annotate(&self, value: impl Into<Cow<'static, str>>) {
        self.cx.span().add_event(value, Vec::new());
    }

    /// Ends the span successfully.
    pub fn finish(&self) {
        self.cx.span().end();
    }

    /// Tags `error.message`, records the error chain and ends the span as failed.
    pub fn finish_with_error(&self, err: &(dyn StdError + 'static)) {
        self.fail(err.to_string(), error_chain(err));
    }

    /// Like [`finish_with_error`](Self::finish_with_error) for failures without an error value.
    pub fn finish_with_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.fail(message.clone(), message);
    }

    fn fail(&self, message: String, chain: String) {
        let span = self.cx.span();
        span.set_attribute(KeyValue::new("error.message", message.clone()));
        span.add_event("error", vec![KeyValue::new("error.chain", chain)]);
        span.set_status(Status::error(message));
        span.end();
    }
}

/// Renders `err` and its sources, one per line.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
