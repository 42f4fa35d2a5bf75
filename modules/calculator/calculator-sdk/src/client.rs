//! Instrumented gRPC client implementation of `CalculatorClientV1`

use async_trait::async_trait;
use tonic::Request;
use tonic::transport::Channel;

use cloudcalc_telemetry::Instrumentation;
use cloudcalc_transport_grpc::attach_identity;
use cloudcalc_transport_grpc::client::{GrpcClientConfig, connect_channel};
use cloudcalc_transport_grpc::propagation::inject_span_context;

use crate::METHOD_CALCULATE;
use crate::api::{CalculatorClientV1, CalculatorError};
use crate::proto::calculator_client::CalculatorClient;
use crate::{BinaryOperation, CalculationResult};

/// gRPC client for the calculator.
///
/// Holds one long-lived channel. Every call opens a client span, records one
/// latency sample, and carries `traceparent` plus the caller identity in its
/// metadata.
#[derive(Clone)]
pub struct CalculatorGrpcClient {
    inner: CalculatorClient<Channel>,
    instrumentation: Instrumentation,
}

impl CalculatorGrpcClient {
    /// Connect to the calculator at `addr` (no retries).
    ///
    /// # Errors
    /// Returns [`CalculatorError::Connect`] if the channel cannot be established.
    pub async fn connect(
        addr: &str,
        cfg: &GrpcClientConfig,
        instrumentation: Instrumentation,
    ) -> Result<Self, CalculatorError> {
        let channel = connect_channel(addr, cfg)
            .await
            .map_err(|e| CalculatorError::Connect(format!("{e:#}")))?;
        Ok(Self::from_channel(channel, instrumentation))
    }

    #[must_use]
    pub fn from_channel(channel: Channel, instrumentation: Instrumentation) -> Self {
        Self {
            inner: CalculatorClient::new(channel),
            instrumentation,
        }
    }
}

#[async_trait]
impl CalculatorClientV1 for CalculatorGrpcClient {
    async fn calculate(
        &self,
        operation: BinaryOperation,
    ) -> Result<CalculationResult, CalculatorError> {
        let span = self.instrumentation.span(METHOD_CALCULATE);

        let mut request = Request::new(operation);
        inject_span_context(&span, request.metadata_mut());

        let identity = self.instrumentation.identity().to_owned();
        let mut client = self.inner.clone();
        self.instrumentation
            .in_span(span, METHOD_CALCULATE, async move {
                // Inside the timed section so a bad identity still yields a sample.
                if let Err(status) = attach_identity(request.metadata_mut(), &identity) {
                    return Err(CalculatorError::Transport(status.message().to_owned()));
                }
                client
                    .calculate(request)
                    .await
                    .map(tonic::Response::into_inner)
                    .map_err(CalculatorError::from)
            })
            .await
    }
}
