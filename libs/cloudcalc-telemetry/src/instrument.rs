//! Per-call instrumentation
//!
//! [`Instrumentation`] decorates a single RPC invocation with a span named
//! after the method and a latency timer. Exactly one [`LatencySample`] is
//! handed to the [`LatencyRecorder`] per invocation, whether the call
//! succeeds, returns an error, panics, or is dropped before completion.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::trace::{TraceContextExt as _, TraceId};
use serde::Serialize;
use tracing::{Instrument as _, Span, field};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

/// How an instrumented call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    Error,
    /// The call panicked or its future was dropped before completing.
    Aborted,
}

impl CallOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the RPC the instrumentation sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSide {
    Server,
    Client,
}

impl CallSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

/// One latency measurement, tagged with caller identity and method name.
#[derive(Debug, Clone)]
pub struct LatencySample {
    pub identity: Arc<str>,
    pub method: &'static str,
    pub latency_ms: f64,
    pub outcome: CallOutcome,
}

/// Sink for latency samples. Implementations must tolerate concurrent calls.
pub trait LatencyRecorder: Send + Sync {
    fn record(&self, sample: &LatencySample);
}

/// Span + latency decorator applied around every RPC, on both sides of the wire.
#[derive(Clone)]
pub struct Instrumentation {
    recorder: Arc<dyn LatencyRecorder>,
    identity: Arc<str>,
    side: CallSide,
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("identity", &self.identity)
            .field("side", &self.side)
            .finish_non_exhaustive()
    }
}

impl Instrumentation {
    #[must_use]
    pub fn new(
        recorder: Arc<dyn LatencyRecorder>,
        identity: impl Into<Arc<str>>,
        side: CallSide,
    ) -> Self {
        Self {
            recorder,
            identity: identity.into(),
            side,
        }
    }

    /// Same recorder and side, different caller identity.
    #[must_use]
    pub fn with_identity(&self, identity: impl Into<Arc<str>>) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
            identity: identity.into(),
            side: self.side,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Create the span for one call of `method`.
    ///
    /// Callers that need to attach a remote parent do so on the returned span
    /// before handing it to [`Instrumentation::in_span`].
    #[must_use]
    pub fn span(&self, method: &'static str) -> Span {
        tracing::info_span!(
            "rpc",
            otel.name = method,
            otel.kind = self.side.as_str(),
            rpc.method = method,
            rpc.identity = %self.identity,
            rpc.outcome = field::Empty,
            trace_id = field::Empty,
        )
    }

    /// Run `work` inside `span`, timing it and recording exactly one sample.
    ///
    /// The result of `work` is returned unchanged.
    ///
    /// # Errors
    /// Returns whatever error `work` returns.
    pub async fn in_span<F, T, E>(&self, span: Span, method: &'static str, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        record_trace_id(&span);
        let mut guard = CallGuard::start(self, method, span.clone());

        let result = work.instrument(span).await;
        match &result {
            Ok(_) => guard.finish(CallOutcome::Ok),
            Err(e) => {
                tracing::warn!(parent: &guard.span, method, error = %e, "call failed");
                guard.finish(CallOutcome::Error);
            }
        }
        result
    }

    /// Shorthand for `in_span(self.span(method), method, work)`.
    ///
    /// # Errors
    /// Returns whatever error `work` returns.
    pub async fn call<F, T, E>(&self, method: &'static str, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let span = self.span(method);
        self.in_span(span, method, work).await
    }
}

fn record_trace_id(span: &Span) {
    let trace_id = span.context().span().span_context().trace_id();
    if trace_id != TraceId::INVALID {
        span.record("trace_id", field::display(trace_id));
    }
}

/// Records the sample when dropped, so unwinding and cancellation are covered too.
struct CallGuard {
    recorder: Arc<dyn LatencyRecorder>,
    identity: Arc<str>,
    method: &'static str,
    span: Span,
    started: Instant,
    outcome: Option<CallOutcome>,
}

impl CallGuard {
    fn start(instr: &Instrumentation, method: &'static str, span: Span) -> Self {
        Self {
            recorder: Arc::clone(&instr.recorder),
            identity: Arc::clone(&instr.identity),
            method,
            span,
            started: Instant::now(),
            outcome: None,
        }
    }

    fn finish(&mut self, outcome: CallOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or(CallOutcome::Aborted);
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.span.record("rpc.outcome", outcome.as_str());
        self.recorder.record(&LatencySample {
            identity: Arc::clone(&self.identity),
            method: self.method,
            latency_ms,
            outcome,
        });
    }
}
