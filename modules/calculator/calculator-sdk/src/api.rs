//! Calculator API trait and types
//!
//! Contract trait and error type for the calculator service.

use async_trait::async_trait;

use crate::{BinaryOperation, CalculationResult};

/// Calculator API trait
///
/// Implementations perform one `Calculate` RPC per call and never retry.
#[async_trait]
pub trait CalculatorClientV1: Send + Sync {
    /// Apply `operation` to its two operands.
    async fn calculate(
        &self,
        operation: BinaryOperation,
    ) -> Result<CalculationResult, CalculatorError>;
}

/// Error type for Calculator operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculatorError {
    /// The server does not know the requested operation.
    #[error("rejected by server: {0}")]
    UndefinedOperation(String),

    #[error("call cancelled: {0}")]
    Cancelled(String),

    #[error("gRPC transport error: {0}")]
    Transport(String),

    #[error("failed to connect: {0}")]
    Connect(String),
}

impl From<tonic::Status> for CalculatorError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_owned();
        match status.code() {
            tonic::Code::InvalidArgument => Self::UndefinedOperation(message),
            tonic::Code::Cancelled => Self::Cancelled(message),
            _ => Self::Transport(format!("{}: {message}", status.code())),
        }
    }
}
