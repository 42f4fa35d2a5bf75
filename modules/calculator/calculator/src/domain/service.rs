//! Domain service for calculator
//!
//! Contains the core calculation logic.

use calculator_sdk::{BinaryOperation, CalculationResult, Operation};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::DomainError;

/// Per-call context handed to the handler.
///
/// Carries the cancellation signal of the call.
///
/// The gRPC server derives it from the process shutdown token only. A caller
/// that gives up does not fire it: tonic drops the handler future instead, and
/// the call is recorded with outcome `aborted` rather than failing with
/// [`DomainError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
}

impl CallContext {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Stateless calculation handler, safe for unlimited concurrent use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Service;

impl Service {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Apply the requested operation to the two operands.
    ///
    /// Cancellation is checked before any computation.
    ///
    /// # Errors
    /// [`DomainError::Cancelled`] if the call context is already cancelled,
    /// [`DomainError::UnsupportedOperation`] for an unknown selector.
    #[allow(clippy::unused_self)] // Keep the handler an instance method so callers hold a `Service`
    pub fn calculate(
        &self,
        ctx: &CallContext,
        op: &BinaryOperation,
    ) -> Result<CalculationResult, DomainError> {
        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        let result = match Operation::try_from(op.operation) {
            Ok(Operation::Add) => op.first_operand + op.second_operand,
            Ok(Operation::Subtract) => op.first_operand - op.second_operand,
            Err(_) => {
                return Err(DomainError::UnsupportedOperation {
                    selector: op.operation,
                });
            }
        };

        debug!(
            first = op.first_operand,
            second = op.second_operand,
            operation = op.operation,
            result,
            "calculated"
        );
        Ok(CalculationResult { result })
    }
}
