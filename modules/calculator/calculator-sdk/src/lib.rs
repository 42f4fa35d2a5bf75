#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Calculator SDK
//!
//! This crate provides everything needed to call or serve the calculator:
//! - API trait (`CalculatorClientV1`)
//! - Error types (`CalculatorError`)
//! - Instrumented gRPC client (`CalculatorGrpcClient`)
//! - Proto stubs for server implementation
//!
//! ## Usage
//!
//! ```ignore
//! use calculator_sdk::{BinaryOperation, CalculatorClientV1, CalculatorGrpcClient, Operation};
//!
//! let client = CalculatorGrpcClient::connect(":50051", &cfg, instrumentation).await?;
//! let result = client.calculate(BinaryOperation::new(2.5, 1.5, Operation::Add)).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

// === API TRAIT AND TYPES ===
mod api;
pub use api::{CalculatorClientV1, CalculatorError};

// === CLIENT ===
mod client;
pub use client::CalculatorGrpcClient;

// === GRPC PROTO STUBS (for server implementation) ===
/// Generated protobuf types for the Calculator service
pub mod proto {
    tonic::include_proto!("cloudcalc.calculator.v1");
}

// Re-export proto types needed by server and callers
pub use proto::calculator_server::{Calculator, CalculatorServer};
pub use proto::{BinaryOperation, CalculationResult, Operation};

/// Method name used for spans and latency tags
pub const METHOD_CALCULATE: &str = "Calculate";

impl BinaryOperation {
    /// Build a request from two operands and a known operation.
    #[must_use]
    pub fn new(first_operand: f32, second_operand: f32, operation: Operation) -> Self {
        Self {
            first_operand,
            second_operand,
            operation: operation.into(),
        }
    }
}
