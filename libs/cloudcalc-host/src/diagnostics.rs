//! Diagnostics HTTP listener (`/debug/rpcz`, `/debug/tracez`)
//!
//! Read-only JSON views over the telemetry registry's in-process buffers.
//! There is no authentication; bind it to an internal interface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use cloudcalc_telemetry::TelemetryRegistry;
use cloudcalc_telemetry::zpages::{RpcStats, RpcStatsEntry, SpanRecord, SpanStore};

use crate::harness::{Listener, ListenerState, ListenerStatus};

/// Shared state behind the diagnostics routes.
#[derive(Clone)]
pub struct DiagnosticsState {
    service_name: Arc<str>,
    rpc_stats: Arc<RpcStats>,
    span_store: Arc<SpanStore>,
}

impl DiagnosticsState {
    #[must_use]
    pub fn new(service_name: &str, rpc_stats: Arc<RpcStats>, span_store: Arc<SpanStore>) -> Self {
        Self {
            service_name: service_name.into(),
            rpc_stats,
            span_store,
        }
    }

    #[must_use]
    pub fn from_registry(registry: &TelemetryRegistry) -> Self {
        Self::new(
            registry.service_name(),
            Arc::clone(registry.rpc_stats()),
            Arc::clone(registry.span_store()),
        )
    }
}

#[derive(Debug, Serialize)]
struct RpczPage {
    service: String,
    total_calls: u64,
    methods: Vec<RpcStatsEntry>,
}

#[derive(Debug, Serialize)]
struct TracezPage {
    service: String,
    capacity: usize,
    spans: Vec<SpanRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct TracezQuery {
    limit: Option<usize>,
}

async fn rpcz(State(state): State<DiagnosticsState>) -> Json<RpczPage> {
    Json(RpczPage {
        service: state.service_name.to_string(),
        total_calls: state.rpc_stats.total_calls(),
        methods: state.rpc_stats.snapshot(),
    })
}

async fn tracez(
    State(state): State<DiagnosticsState>,
    Query(query): Query<TracezQuery>,
) -> Json<TracezPage> {
    let mut spans = state.span_store.recent();
    if let Some(limit) = query.limit {
        spans.truncate(limit);
    }
    Json(TracezPage {
        service: state.service_name.to_string(),
        capacity: state.span_store.capacity(),
        spans,
    })
}

/// Router serving the diagnostics pages under `/debug`.
#[must_use]
pub fn router(state: DiagnosticsState) -> Router {
    Router::new()
        .route("/debug/rpcz", get(rpcz))
        .route("/debug/tracez", get(tracez))
        .with_state(state)
}

/// Harness listener hosting [`router`] on a TCP address.
pub struct DiagnosticsListener {
    addr: SocketAddr,
    state: DiagnosticsState,
    status: ListenerStatus,
}

impl DiagnosticsListener {
    #[must_use]
    pub fn new(addr: SocketAddr, state: DiagnosticsState) -> Self {
        Self {
            addr,
            state,
            status: ListenerStatus::new(),
        }
    }
}

#[async_trait]
impl Listener for DiagnosticsListener {
    fn name(&self) -> &'static str {
        "diagnostics"
    }

    fn status(&self) -> &ListenerStatus {
        &self.status
    }

    async fn serve(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        self.status.set(ListenerState::Binding);
        let listener = match tokio::net::TcpListener::bind(self.addr).await {
            Ok(l) => l,
            Err(e) => {
                self.status.set(ListenerState::Failed(e.to_string()));
                return Err(e).with_context(|| {
                    format!("failed to bind diagnostics listener on {}", self.addr)
                });
            }
        };
        let bound_addr = listener.local_addr()?;
        tracing::info!(%bound_addr, "diagnostics pages at http://{bound_addr}/debug/rpcz and /debug/tracez");
        self.status.set(ListenerState::Serving(bound_addr));

        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("diagnostics listener shutting down gracefully (cancellation)");
        };

        let served = axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(shutdown)
            .await;
        match served {
            Ok(()) => {
                self.status.set(ListenerState::Stopped);
                Ok(())
            }
            Err(e) => {
                self.status.set(ListenerState::Failed(e.to_string()));
                Err(anyhow::anyhow!(e))
            }
        }
    }
}
