#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
//! CloudCalc telemetry
//!
//! Everything a CloudCalc process needs to observe its RPCs:
//! - [`TelemetryRegistry`]: the process-wide latency measure, tag keys and
//!   OTLP export pipeline (traces + metrics), constructed once at startup
//! - [`Instrumentation`]: the per-call wrapper that opens a span and records
//!   exactly one latency sample for every invocation
//! - [`zpages`]: in-memory ring buffers backing the diagnostics pages
//! - [`logging`]: one `tracing_subscriber` registry wiring it all together

pub mod config;
mod error;
pub mod instrument;
pub mod logging;
pub mod registry;
pub mod zpages;

pub use config::{Exporter, Sampler, TelemetryConfig};
pub use error::TelemetryError;
pub use instrument::{CallOutcome, CallSide, Instrumentation, LatencyRecorder, LatencySample};
pub use logging::{LogFormat, LoggingConfig, init_logging};
pub use registry::{LATENCY_BOUNDARIES_MS, TAG_CLIENT, TAG_METHOD, TelemetryRegistry};
