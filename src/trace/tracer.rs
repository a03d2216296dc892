//! # Tracer: starts spans on an injected OpenTelemetry tracer.

use std::borrow::Cow;
use std::fmt;

use opentelemetry::Context;
use opentelemetry::trace::{
    SamplingDecision, SamplingResult, SpanBuilder, SpanContext, SpanKind, TraceContextExt,
    TraceState, Tracer as _, TracerProvider as _,
};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

use super::span::Span;

/// Span factory shared by all components of one application.
///
/// Cheap to clone. Injected through [`AppContext`](crate::AppContext); there is
/// no global tracer. Sampling of new traces follows the provider's sampler unless
/// the caller forces a decision.
#[derive(Clone)]
pub struct Tracer {
    inner: SdkTracer,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    /// Tracer for `service` from `provider`.
    pub fn new(provider: &SdkTracerProvider, service: impl Into<Cow<'static, str>>) -> Self {
        Self {
            inner: provider.tracer(service),
        }
    }

    /// Wraps an already built SDK tracer.
    pub fn from_sdk(inner: SdkTracer) -> Self {
        Self { inner }
    }

    /// Starts a root span.
    ///
    /// `sampled` forces the sampling decision (the provider's sampler decides when
    /// it is `None`); `debug` forces recording.
    pub fn new_trace(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        sampled: Option<bool>,
        debug: bool,
    ) -> Span {
        let builder = forced(self.inner.span_builder(name).with_kind(kind), sampled, debug);
        self.start(builder, &Context::new())
    }

    /// Starts a span continuing `remote`, the context a peer sent along.
    pub fn join_span(
        &self,
        remote: SpanContext,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        debug: bool,
    ) -> Span {
        let builder = forced(self.inner.span_builder(name).with_kind(kind), None, debug);
        self.start(builder, &Context::new().with_remote_span_context(remote))
    }

    /// Starts a child of `parent`.
    pub fn new_child(
        &self,
        parent: &Context,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
    ) -> Span {
        let builder = self.inner.span_builder(name).with_kind(kind);
        self.start(builder, parent)
    }

    fn start(&self, builder: SpanBuilder, parent: &Context) -> Span {
        let span = builder.start_with_context(&self.inner, parent);
        Span::new(self.clone(), parent.with_span(span))
    }
}

fn forced(builder: SpanBuilder, sampled: Option<bool>, debug: bool) -> SpanBuilder {
    let decision = match (sampled, debug) {
        (_, true) | (Some(true), _) => SamplingDecision::RecordAndSample,
        (Some(false), false) => SamplingDecision::Drop,
        (None, false) => return builder,
    };
    builder.with_sampling_result(SamplingResult {
        decision,
        attributes: Vec::new(),
        trace_state: TraceState::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::testing::{finished, recording_tracer};
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId};

    fn remote(sampled: bool) -> SpanContext {
        let flags = if sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        SpanContext::new(
            TraceId::from_hex("00000000000000000000000000000007").unwrap(),
            SpanId::from_hex("0000000000000002").unwrap(),
            flags,
            true,
            TraceState::default(),
        )
    }

    #[test]
    fn test_join_continues_remote_trace() {
        let (tracer, exporter) = recording_tracer();
        let span = tracer.join_span(remote(true), "amqp:message", SpanKind::Server, false);
        span.finish();

        let rec = &finished(&exporter, "amqp:message")[0];
        assert_eq!(rec.span_context.trace_id(), remote(true).trace_id());
        assert_eq!(rec.parent_span_id, remote(true).span_id());
        assert_eq!(rec.span_kind, SpanKind::Server);
    }

    #[test]
    fn test_unsampled_remote_is_not_exported_unless_debug() {
        let (tracer, exporter) = recording_tracer();
        tracer
            .join_span(remote(false), "quiet", SpanKind::Server, false)
            .finish();
        tracer
            .join_span(remote(false), "loud", SpanKind::Server, true)
            .finish();

        assert!(finished(&exporter, "quiet").is_empty());
        assert_eq!(finished(&exporter, "loud").len(), 1);
    }

    #[test]
    fn test_forced_sampling_of_new_traces() {
        let (tracer, exporter) = recording_tracer();
        let off = tracer.new_trace("off", SpanKind::Server, Some(false), false);
        assert!(!off.span_context().is_sampled());
        off.finish();
        tracer
            .new_trace("debug", SpanKind::Server, Some(false), true)
            .finish();

        assert!(finished(&exporter, "off").is_empty());
        assert_eq!(finished(&exporter, "debug").len(), 1);
    }

    #[test]
    fn test_child_inherits_trace() {
        let (tracer, _exporter) = recording_tracer();
        let root = tracer.new_trace("request", SpanKind::Server, Some(true), false);
        let child = root.new_child("redis:get", SpanKind::Client);
        assert_eq!(
            child.span_context().trace_id(),
            root.span_context().trace_id()
        );
        assert_ne!(child.span_context().span_id(), root.span_context().span_id());
    }
}
