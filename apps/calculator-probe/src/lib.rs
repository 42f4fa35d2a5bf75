#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
//! CloudCalc probe
//!
//! A retry-free client that calls the calculator on a fixed interval with
//! client-side tracing and latency instrumentation, next to its own
//! diagnostics pages.

pub mod config;
pub mod probe;

pub use config::{CliOverrides, OnError, OperationPolicy, ProbeConfig, ProbeSection};
pub use probe::{Probe, ProbeListener, ProbeSettings};
