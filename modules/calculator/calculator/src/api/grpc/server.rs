//! gRPC Server implementation for calculator
//!
//! The server implementation handles gRPC requests and delegates
//! to the domain Service for business logic. Every request runs inside the
//! server-side instrumentation wrapper, parented on the caller's trace.

use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use calculator_sdk::{BinaryOperation, CalculationResult, Calculator, METHOD_CALCULATE};
use cloudcalc_telemetry::Instrumentation;
use cloudcalc_transport_grpc::extract_identity;
use cloudcalc_transport_grpc::propagation::set_parent_from_metadata;

use crate::domain::{CallContext, DomainError, Service};

/// gRPC service implementation that wraps the domain Service.
#[derive(Clone)]
pub struct CalculatorServiceImpl {
    service: Service,
    instrumentation: Instrumentation,
    shutdown: CancellationToken,
}

impl CalculatorServiceImpl {
    /// `shutdown` is the process token; each call gets a child of it.
    #[must_use]
    pub fn new(service: Service, instrumentation: Instrumentation, shutdown: CancellationToken) -> Self {
        Self {
            service,
            instrumentation,
            shutdown,
        }
    }
}

fn to_status(err: &DomainError) -> Status {
    match err {
        DomainError::UnsupportedOperation { .. } => Status::invalid_argument(err.to_string()),
        DomainError::Cancelled => Status::cancelled(err.to_string()),
    }
}

#[tonic::async_trait]
impl Calculator for CalculatorServiceImpl {
    async fn calculate(
        &self,
        request: Request<BinaryOperation>,
    ) -> Result<Response<CalculationResult>, Status> {
        let identity = extract_identity(request.metadata());
        let instrumentation = self.instrumentation.with_identity(identity);

        let span = instrumentation.span(METHOD_CALCULATE);
        set_parent_from_metadata(&span, request.metadata());

        // Shutdown-scoped; caller disconnects drop this future instead.
        let ctx = CallContext::new(self.shutdown.child_token());
        let op = request.into_inner();
        let service = self.service;

        instrumentation
            .in_span(span, METHOD_CALCULATE, async move {
                tracing::debug!("started");
                service
                    .calculate(&ctx, &op)
                    .map(Response::new)
                    .map_err(|e| to_status(&e))
            })
            .await
    }
}
