//! W3C Trace Context propagation over gRPC metadata
//!
//! The client injects the context of its RPC span as `traceparent`; the
//! server extracts it and parents its own span on it, so both halves of a
//! call share one trace.

use opentelemetry::global;
use opentelemetry::propagation::{Extractor, Injector};
use tonic::metadata::{KeyRef, MetadataKey, MetadataMap, MetadataValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// W3C Trace Context metadata key
pub const TRACEPARENT: &str = "traceparent";

/// Extract traceparent value from gRPC metadata
#[must_use]
pub fn get_traceparent(meta: &MetadataMap) -> Option<&str> {
    meta.get(TRACEPARENT)?.to_str().ok()
}

/// Parse trace ID from W3C traceparent header (format: "00-{trace_id}-{span_id}-{flags}")
#[must_use]
pub fn parse_trace_id(traceparent: &str) -> Option<&str> {
    let mut parts = traceparent.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("00"), Some(trace_id), Some(_), Some(_)) if trace_id.len() == 32 => Some(trace_id),
        _ => None,
    }
}

struct MetadataExtractor<'a>(&'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|k| match k {
                KeyRef::Ascii(k) => Some(k.as_str()),
                KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

struct MetadataInjector<'a>(&'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            MetadataKey::from_bytes(key.as_bytes()),
            MetadataValue::try_from(value.as_str()),
        ) {
            self.0.insert(name, val);
        }
    }
}

/// Inject the OpenTelemetry context of `span` into outgoing metadata.
///
/// Nothing is written when `span` carries no valid trace context.
pub fn inject_span_context(span: &Span, meta: &mut MetadataMap) {
    let cx = span.context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut MetadataInjector(meta));
    });
}

/// Set span parent from W3C Trace Context metadata.
pub fn set_parent_from_metadata(span: &Span, meta: &MetadataMap) {
    let parent_cx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&MetadataExtractor(meta))
    });

    // A span that is already closed keeps its original parent.
    #[allow(clippy::let_underscore_must_use)]
    let _ = span.set_parent(parent_cx);

    if let Some(trace_id) = get_traceparent(meta).and_then(parse_trace_id) {
        tracing::trace!(parent: span, %trace_id, "remote parent attached");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use opentelemetry::trace::{TraceContextExt as _, TracerProvider as _};
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_subscriber::layer::SubscriberExt as _;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_trace_id_ok() {
        assert_eq!(parse_trace_id(SAMPLE), Some("4bf92f3577b34da6a3ce929d0e0e4736"));
    }

    #[test]
    fn test_parse_trace_id_invalid() {
        assert!(parse_trace_id("invalid").is_none());
        assert!(parse_trace_id("").is_none());
        assert!(parse_trace_id("01-abc-def-01").is_none());
    }

    #[test]
    fn test_get_traceparent() {
        let mut meta = MetadataMap::new();
        assert!(get_traceparent(&meta).is_none());
        meta.insert(TRACEPARENT, MetadataValue::from_static(SAMPLE));
        assert_eq!(get_traceparent(&meta), Some(SAMPLE));
    }

    #[test]
    fn test_context_survives_the_wire() {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));

        tracing::subscriber::with_default(subscriber, || {
            let client_span = tracing::info_span!("client");
            let mut meta = MetadataMap::new();
            inject_span_context(&client_span, &mut meta);

            let sent = get_traceparent(&meta).and_then(parse_trace_id).unwrap().to_owned();
            let client_trace = client_span.context().span().span_context().trace_id();
            assert_eq!(sent, client_trace.to_string());

            let server_span = tracing::info_span!("server");
            set_parent_from_metadata(&server_span, &meta);
            let server_trace = server_span.context().span().span_context().trace_id();
            assert_eq!(server_trace, client_trace);
        });
    }

    #[test]
    fn test_inject_without_context_writes_nothing() {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let mut meta = MetadataMap::new();
        inject_span_context(&Span::none(), &mut meta);
        assert!(get_traceparent(&meta).is_none());
    }
}
