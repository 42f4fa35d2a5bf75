use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Field that marks a span as an RPC span worth keeping.
const RPC_METHOD_FIELD: &str = "rpc.method";
const OTEL_NAME_FIELD: &str = "otel.name";

/// A completed RPC span as shown on `/debug/tracez`.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub started_unix_ms: u64,
    pub duration_ms: f64,
    pub fields: BTreeMap<String, String>,
}

/// Bounded ring of the most recently closed RPC spans.
pub struct SpanStore {
    capacity: usize,
    spans: Mutex<VecDeque<SpanRecord>>,
}

impl SpanStore {
    /// A store holding at most `capacity` spans. Zero disables collection.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            spans: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, record: SpanRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut spans = self.spans.lock();
        if spans.len() == self.capacity {
            spans.pop_front();
        }
        spans.push_back(record);
    }

    /// Newest first.
    #[must_use]
    pub fn recent(&self) -> Vec<SpanRecord> {
        self.spans.lock().iter().rev().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// `tracing` layer copying closed RPC spans into a [`SpanStore`].
///
/// Only spans carrying an `rpc.method` field are tracked; everything else
/// passes through untouched.
pub struct SpanStoreLayer {
    store: Arc<SpanStore>,
}

impl SpanStoreLayer {
    #[must_use]
    pub fn new(store: Arc<SpanStore>) -> Self {
        Self { store }
    }
}

struct OpenSpan {
    started: Instant,
    started_at: SystemTime,
    fields: FieldVisitor,
}

#[derive(Default)]
struct FieldVisitor(BTreeMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_owned(), value.to_owned());
    }

    #[allow(clippy::use_debug)]
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_owned(), format!("{value:?}"));
    }
}

impl<S> Layer<S> for SpanStoreLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().fields().field(RPC_METHOD_FIELD).is_none() {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = FieldVisitor::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(OpenSpan {
            started: Instant::now(),
            started_at: SystemTime::now(),
            fields,
        });
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if let Some(open) = span.extensions_mut().get_mut::<OpenSpan>() {
            values.record(&mut open.fields);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let Some(open) = span.extensions_mut().remove::<OpenSpan>() else {
            return;
        };

        let mut fields = open.fields.0;
        let name = fields
            .remove(OTEL_NAME_FIELD)
            .unwrap_or_else(|| span.name().to_owned());
        fields.retain(|k, _| !k.starts_with("otel."));

        let started_unix_ms = open
            .started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();

        self.store.push(SpanRecord {
            name,
            started_unix_ms,
            duration_ms: open.started.elapsed().as_secs_f64() * 1000.0,
            fields,
        });
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::instrument::{CallSide, Instrumentation, LatencyRecorder, LatencySample};
    use futures::FutureExt as _;
    use std::panic::AssertUnwindSafe;
    use tracing_subscriber::layer::SubscriberExt as _;

    struct NoopRecorder;

    impl LatencyRecorder for NoopRecorder {
        fn record(&self, _sample: &LatencySample) {}
    }

    fn record(name: &str) -> SpanRecord {
        SpanRecord {
            name: name.to_owned(),
            started_unix_ms: 0,
            duration_ms: 0.0,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let store = SpanStore::new(2);
        store.push(record("a"));
        store.push(record("b"));
        store.push(record("c"));

        let names: Vec<_> = store.recent().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["c", "b"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let store = SpanStore::new(0);
        store.push(record("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_layer_captures_one_span_per_call() {
        let store = Arc::new(SpanStore::new(16));
        let subscriber =
            tracing_subscriber::registry().with(SpanStoreLayer::new(Arc::clone(&store)));
        let instr = Instrumentation::new(Arc::new(NoopRecorder), "golang", CallSide::Server);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info_span!("unrelated").in_scope(|| {});
            futures::executor::block_on(async {
                instr.call("Calculate", async { Ok::<_, String>(()) }).await.unwrap();
                let failed = instr
                    .call("Calculate", async { Err::<(), _>("undefined operation".to_owned()) })
                    .await;
                assert!(failed.is_err());
            });
        });

        let spans = store.recent();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "Calculate");
        assert_eq!(spans[0].fields["rpc.outcome"], "error");
        assert_eq!(spans[1].fields["rpc.outcome"], "ok");
        assert_eq!(spans[1].fields["rpc.identity"], "golang");
        assert!(!spans[1].fields.contains_key("otel.kind"));
    }

    fn exploding_handler() -> u32 {
        panic!("handler blew up")
    }

    #[test]
    fn test_panicked_and_dropped_calls_close_their_span_as_aborted() {
        let store = Arc::new(SpanStore::new(16));
        let subscriber =
            tracing_subscriber::registry().with(SpanStoreLayer::new(Arc::clone(&store)));
        let instr = Instrumentation::new(Arc::new(NoopRecorder), "rust", CallSide::Client);

        tracing::subscriber::with_default(subscriber, || {
            futures::executor::block_on(async {
                let panicked = AssertUnwindSafe(instr.call("Calculate", async {
                    Ok::<u32, String>(exploding_handler())
                }))
                .catch_unwind()
                .await;
                assert!(panicked.is_err());

                let mut pending =
                    Box::pin(instr.call("Calculate", std::future::pending::<Result<(), String>>()));
                assert!(futures::poll!(pending.as_mut()).is_pending());
                drop(pending);
            });
        });

        let spans = store.recent();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.name == "Calculate"));
        assert!(spans.iter().all(|s| s.fields["rpc.outcome"] == "aborted"));
    }
}
