#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
//! Calculator Module
//!
//! Binary arithmetic over gRPC, instrumented on every call.
//!
//! ## Architecture
//!
//! - `domain/service.rs` - Core business logic
//! - `api/grpc/server.rs` - gRPC server implementation
//! - `listener.rs` - TCP listener hosting the gRPC server inside a harness
//!
//! External consumers should use the `calculator-sdk` crate which provides
//! the instrumented gRPC client.

pub mod api;
pub mod domain;
pub mod listener;

pub use api::grpc::CalculatorServiceImpl;
pub use domain::{CallContext, DomainError, Service};
pub use listener::GrpcListener;
