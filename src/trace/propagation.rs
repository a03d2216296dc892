//! # Zipkin B3 trace-context propagation through message headers.
//!
//! The codec is `opentelemetry_zipkin`'s B3 propagator in multi-header encoding,
//! instantiated per call. The global text-map propagator is never consulted, so
//! what goes on the wire does not depend on process-wide setup.
//!
//! | Header              | Value                                   |
//! |---------------------|-----------------------------------------|
//! | `x-b3-traceid`      | 32 (or 16 on input) lowercase hex       |
//! | `x-b3-spanid`       | 16 lowercase hex                        |
//! | `x-b3-parentspanid` | 16 lowercase hex, read only             |
//! | `x-b3-sampled`      | `1` / `0`, omitted when undecided       |
//! | `x-b3-flags`        | `1` when debug                          |
//!
//! Header names are matched case-insensitively on extraction, since brokers and
//! client libraries do not agree on header casing.
//!
//! ```rust
//! use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
//! use opentelemetry::Context;
//! use connvisor::trace::propagation;
//!
//! let sent = SpanContext::new(
//!     TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
//!     SpanId::from_hex("00f067aa0ba902b7").unwrap(),
//!     TraceFlags::SAMPLED,
//!     false,
//!     TraceState::default(),
//! );
//! let headers = propagation::inject(&Context::new().with_remote_span_context(sent.clone()));
//! let got = propagation::extract(&headers).unwrap();
//! assert_eq!((got.trace_id(), got.span_id()), (sent.trace_id(), sent.span_id()));
//! ```

use std::collections::BTreeMap;

use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry_zipkin::{B3Encoding, Propagator};

/// Message metadata map carried next to the payload.
pub type Headers = BTreeMap<String, String>;

pub const TRACE_ID_HEADER: &str = "x-b3-traceid";
pub const SPAN_ID_HEADER: &str = "x-b3-spanid";
pub const PARENT_ID_HEADER: &str = "x-b3-parentspanid";
pub const SAMPLED_HEADER: &str = "x-b3-sampled";
pub const FLAGS_HEADER: &str = "x-b3-flags";

/// Every header this module reads or writes.
pub const ALL_HEADERS: [&str; 5] = [
    TRACE_ID_HEADER,
    SPAN_ID_HEADER,
    PARENT_ID_HEADER,
    SAMPLED_HEADER,
    FLAGS_HEADER,
];

fn b3() -> Propagator {
    Propagator::with_encoding(B3Encoding::MultipleHeader)
}

/// Writes into [`Headers`].
pub struct HeaderInjector<'a>(pub &'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

/// Reads from [`Headers`], ignoring key casing.
pub struct HeaderExtractor<'a>(pub &'a Headers);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        header(self.0, key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Serializes the span context of `cx` into a fresh headers fragment.
pub fn inject(cx: &Context) -> Headers {
    let mut headers = Headers::new();
    inject_into(cx, &mut headers);
    headers
}

/// Writes the span context of `cx` into `headers`, leaving unrelated keys untouched.
///
/// Existing trace headers are replaced whatever their casing. A context without a
/// valid span writes nothing.
pub fn inject_into(cx: &Context, headers: &mut Headers) {
    headers.retain(|key, _| !is_trace_header(key));
    b3().inject_context(cx, &mut HeaderInjector(headers));
}

/// Reads a remote span context from `headers`.
///
/// Returns `None` (not an error) when the trace id or span id is missing or
/// malformed; the caller then starts a new trace using [`parse_sampled`] and
/// [`parse_debug`].
pub fn extract(headers: &Headers) -> Option<SpanContext> {
    let ids = [TRACE_ID_HEADER, SPAN_ID_HEADER, PARENT_ID_HEADER];
    if ids
        .iter()
        .filter_map(|name| header(headers, name))
        .any(|v| !is_hex(v))
    {
        return None;
    }

    let cx = b3().extract(&HeaderExtractor(headers));
    let remote = cx.span().span_context().clone();
    remote.is_valid().then_some(remote)
}

/// Reads the standalone sampling decision.
pub fn parse_sampled(headers: &Headers) -> Option<bool> {
    match header(headers, SAMPLED_HEADER)?.trim() {
        "1" => Some(true),
        "0" => Some(false),
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Reads the standalone debug flag.
pub fn parse_debug(headers: &Headers) -> bool {
    header(headers, FLAGS_HEADER).is_some_and(|v| v.trim() == "1")
}

/// True if `key` is one of the B3 headers (any casing).
pub fn is_trace_header(key: &str) -> bool {
    ALL_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(key))
}

fn is_hex(v: &str) -> bool {
    !v.is_empty() && v.bytes().all(|b| b.is_ascii_hexdigit())
}

fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .or_else(|| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
        .map(String::as_str)
}
