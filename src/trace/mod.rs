//! # Distributed tracing: spans and trace-context propagation.
//!
//! Spans are OpenTelemetry spans minted from an explicitly injected [`Tracer`]
//! (an `opentelemetry_sdk` tracer). Nothing here reads the global tracer provider,
//! the global propagator or the thread-local current context: spans are passed as
//! parameters through every async call chain, because the runtime interleaves
//! unrelated units of work on the same worker threads.
//!
//! ## Contents
//! - [`propagation`]: Zipkin B3 multi-header inject/extract over message [`Headers`],
//!   through an explicitly instantiated `opentelemetry_zipkin` propagator
//! - [`Span`]: clonable handle to one started span with tag/annotate/finish helpers
//! - [`Tracer`]: starts root, remote-parented and child spans
//!
//! Exporting finished spans is the tracer provider's business: install a Zipkin,
//! OTLP or stdout exporter on the `SdkTracerProvider` the [`Tracer`] comes from.
//!
//! ## Flow
//! ```text
//! publish:  caller span ──inject──► message headers     (child "amqp:publish" span traces the call)
//! consume:  message headers ──extract──► Some(remote) ──► tracer.join_span(remote)
//!                                     └─► None        ──► tracer.new_trace(sampled, debug)
//! ```

pub mod propagation;
mod span;
mod tracer;

pub use opentelemetry::trace::SpanKind;
pub use propagation::Headers;
pub use span::Span;
pub use tracer::Tracer;
