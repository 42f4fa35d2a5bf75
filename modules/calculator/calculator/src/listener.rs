//! RPC listener hosting the Calculator service under the host harness.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use calculator_sdk::CalculatorServer;
use cloudcalc_host::{Listener, ListenerState, ListenerStatus};

use crate::api::grpc::CalculatorServiceImpl;

/// Serves [`CalculatorServiceImpl`] over plain HTTP/2 on a TCP address.
pub struct GrpcListener {
    addr: SocketAddr,
    service: CalculatorServiceImpl,
    status: ListenerStatus,
}

impl GrpcListener {
    #[must_use]
    pub fn new(addr: SocketAddr, service: CalculatorServiceImpl) -> Self {
        Self {
            addr,
            service,
            status: ListenerStatus::new(),
        }
    }
}

#[async_trait]
impl Listener for GrpcListener {
    fn name(&self) -> &'static str {
        "grpc"
    }

    fn status(&self) -> &ListenerStatus {
        &self.status
    }

    async fn serve(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        self.status.set(ListenerState::Binding);
        let listener = match TcpListener::bind(self.addr).await {
            Ok(l) => l,
            Err(e) => {
                self.status.set(ListenerState::Failed(e.to_string()));
                return Err(e)
                    .with_context(|| format!("failed to bind gRPC listener on {}", self.addr));
            }
        };
        let bound_addr = listener.local_addr()?;
        tracing::info!(%bound_addr, transport = "tcp", "gRPC server listening");
        self.status.set(ListenerState::Serving(bound_addr));

        let incoming = TcpListenerStream::new(listener);
        let served = Server::builder()
            .add_service(CalculatorServer::new(self.service.clone()))
            .serve_with_incoming_shutdown(incoming, async move {
                cancel.cancelled().await;
                tracing::info!("gRPC server shutting down gracefully (cancellation)");
            })
            .await;

        match served {
            Ok(()) => {
                self.status.set(ListenerState::Stopped);
                Ok(())
            }
            Err(e) => {
                self.status.set(ListenerState::Failed(e.to_string()));
                Err(e).context("gRPC server terminated")
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::Service;
    use cloudcalc_telemetry::{CallSide, Instrumentation, LatencyRecorder, LatencySample};

    struct Discard;

    impl LatencyRecorder for Discard {
        fn record(&self, _sample: &LatencySample) {}
    }

    fn listener(addr: SocketAddr) -> Arc<GrpcListener> {
        let instr = Instrumentation::new(Arc::new(Discard), "rust", CallSide::Server);
        let svc = CalculatorServiceImpl::new(Service::new(), instr, CancellationToken::new());
        Arc::new(GrpcListener::new(addr, svc))
    }

    #[tokio::test]
    async fn test_serves_until_cancelled() {
        let grpc = listener("127.0.0.1:0".parse().unwrap());
        let cancel = CancellationToken::new();
        let task = {
            let grpc = Arc::clone(&grpc);
            let cancel = cancel.clone();
            tokio::spawn(async move { grpc.serve(cancel).await })
        };

        let bound = grpc.status().wait_serving().await.unwrap();
        assert_ne!(bound.port(), 0);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(grpc.status().current(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_failed() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let grpc = listener(occupied.local_addr().unwrap());

        let err = Arc::clone(&grpc)
            .serve(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("failed to bind gRPC listener"));
        assert!(matches!(grpc.status().current(), ListenerState::Failed(_)));
        assert_eq!(grpc.name(), "grpc");
    }
}
