#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end: instrumented SDK client against the in-process gRPC listener.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use calculator::{CalculatorServiceImpl, GrpcListener, Service};
use calculator_sdk::{
    BinaryOperation, CalculatorClientV1, CalculatorError, CalculatorGrpcClient, Operation,
};
use cloudcalc_host::{Harness, Listener};
use cloudcalc_telemetry::{
    CallOutcome, CallSide, Instrumentation, LatencyRecorder, LatencySample,
};
use cloudcalc_transport_grpc::client::GrpcClientConfig;

#[derive(Default)]
struct CollectingRecorder {
    samples: Mutex<Vec<LatencySample>>,
}

impl LatencyRecorder for CollectingRecorder {
    fn record(&self, sample: &LatencySample) {
        self.samples.lock().push(sample.clone());
    }
}

struct Fixture {
    cancel: CancellationToken,
    run: tokio::task::JoinHandle<anyhow::Result<()>>,
    server_samples: Arc<CollectingRecorder>,
    client_samples: Arc<CollectingRecorder>,
    client: CalculatorGrpcClient,
}

async fn start() -> Fixture {
    let cancel = CancellationToken::new();
    let server_samples = Arc::new(CollectingRecorder::default());
    let instr = Instrumentation::new(server_samples.clone(), "rust", CallSide::Server);
    let svc = CalculatorServiceImpl::new(Service::new(), instr, cancel.clone());
    let grpc = Arc::new(GrpcListener::new("127.0.0.1:0".parse().unwrap(), svc));

    let run = tokio::spawn(Harness::new(cancel.clone()).with(grpc.clone()).run());
    let addr = grpc.status().wait_serving().await.unwrap();

    let client_samples = Arc::new(CollectingRecorder::default());
    let client_instr = Instrumentation::new(client_samples.clone(), "golang", CallSide::Client);
    let cfg = GrpcClientConfig::new("calculator").with_connect_timeout(Duration::from_secs(5));
    let client = CalculatorGrpcClient::connect(&format!("http://{addr}"), &cfg, client_instr)
        .await
        .unwrap();

    Fixture {
        cancel,
        run,
        server_samples,
        client_samples,
        client,
    }
}

impl Fixture {
    async fn stop(self) {
        let Self {
            cancel, run, client, ..
        } = self;
        drop(client);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("server must stop after cancellation")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn add_and_subtract_round_trip() {
    let fx = start().await;

    let sum = fx
        .client
        .calculate(BinaryOperation::new(2.5, 1.5, Operation::Add))
        .await
        .unwrap();
    let diff = fx
        .client
        .calculate(BinaryOperation::new(5.0, 3.0, Operation::Subtract))
        .await
        .unwrap();

    assert!((sum.result - 4.0).abs() < f32::EPSILON);
    assert!((diff.result - 2.0).abs() < f32::EPSILON);

    let server = fx.server_samples.samples.lock().clone();
    assert_eq!(server.len(), 2);
    assert!(server.iter().all(|s| &*s.identity == "golang"));
    assert!(server.iter().all(|s| s.outcome == CallOutcome::Ok));
    assert_eq!(fx.client_samples.samples.lock().len(), 2);

    fx.stop().await;
}

#[tokio::test]
async fn unknown_selector_is_rejected_and_still_measured() {
    let fx = start().await;

    let err = fx
        .client
        .calculate(BinaryOperation {
            first_operand: 1.0,
            second_operand: 2.0,
            operation: 99,
        })
        .await
        .unwrap_err();

    match err {
        CalculatorError::UndefinedOperation(msg) => assert_eq!(msg, "undefined operation"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.server_samples.samples.lock()[0].outcome, CallOutcome::Error);
    assert_eq!(fx.client_samples.samples.lock()[0].outcome, CallOutcome::Error);

    fx.stop().await;
}

#[tokio::test]
async fn unsendable_identity_fails_the_call_and_is_measured() {
    let samples = Arc::new(CollectingRecorder::default());
    let instr = Instrumentation::new(samples.clone(), "bad\nidentity", CallSide::Client);
    let channel = tonic::transport::Channel::from_static("http://127.0.0.1:1").connect_lazy();
    let client = CalculatorGrpcClient::from_channel(channel, instr);

    let err = client
        .calculate(BinaryOperation::new(1.0, 1.0, Operation::Add))
        .await
        .unwrap_err();

    assert!(matches!(err, CalculatorError::Transport(_)), "unexpected error: {err}");
    let recorded = samples.samples.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].outcome, CallOutcome::Error);
}

#[tokio::test]
async fn concurrent_calls_record_one_sample_each() {
    let fx = start().await;

    let calls = (0..32u8).map(|i| {
        let client = fx.client.clone();
        async move {
            client
                .calculate(BinaryOperation::new(f32::from(i), 1.0, Operation::Subtract))
                .await
        }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(fx.server_samples.samples.lock().len(), 32);
    assert_eq!(fx.client_samples.samples.lock().len(), 32);

    fx.stop().await;
}
