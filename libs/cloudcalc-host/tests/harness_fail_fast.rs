#![allow(clippy::unwrap_used, clippy::expect_used)]

//! One listener failing to bind must take the whole process down, including
//! siblings that were already serving.

use std::sync::Arc;
use std::time::Duration;

use cloudcalc_host::{DiagnosticsListener, DiagnosticsState, Harness, Listener, ListenerState};
use cloudcalc_telemetry::zpages::{RpcStats, SpanStore};
use tokio_util::sync::CancellationToken;

fn state() -> DiagnosticsState {
    DiagnosticsState::new(
        "grpc-cloudrun-server",
        Arc::new(RpcStats::default()),
        Arc::new(SpanStore::new(8)),
    )
}

#[tokio::test]
async fn bind_conflict_stops_every_listener() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = occupied.local_addr().unwrap();

    let healthy = Arc::new(DiagnosticsListener::new("127.0.0.1:0".parse().unwrap(), state()));
    let conflicting = Arc::new(DiagnosticsListener::new(taken, state()));
    let cancel = CancellationToken::new();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        Harness::new(cancel.clone())
            .with(healthy.clone())
            .with(conflicting.clone())
            .run(),
    )
    .await
    .expect("harness must not hang after a bind failure");

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("failed to bind diagnostics listener"));
    assert!(cancel.is_cancelled());
    assert!(matches!(conflicting.status().current(), ListenerState::Failed(_)));
    assert_eq!(healthy.status().current(), ListenerState::Stopped);
}

#[tokio::test]
async fn external_cancel_is_a_clean_exit() {
    let listener = Arc::new(DiagnosticsListener::new("127.0.0.1:0".parse().unwrap(), state()));
    let cancel = CancellationToken::new();
    let harness = Harness::new(cancel.clone()).with(listener.clone());

    let run = tokio::spawn(harness.run());
    listener.status().wait_serving().await.unwrap();
    cancel.cancel();

    run.await.unwrap().unwrap();
    assert_eq!(listener.status().current(), ListenerState::Stopped);
}
