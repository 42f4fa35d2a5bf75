//! The probe loop and its harness listener.
//!
//! Each iteration sends two random operands in `[0, 1)` to the calculator,
//! logs the result and sleeps for the configured interval. There are no
//! retries: a failed call either ends the process or is logged and skipped,
//! depending on [`OnError`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng as _;
use tokio_util::sync::CancellationToken;

use calculator_sdk::{BinaryOperation, CalculatorClientV1, CalculatorGrpcClient};
use cloudcalc_host::{Listener, ListenerState, ListenerStatus};
use cloudcalc_telemetry::Instrumentation;
use cloudcalc_transport_grpc::client::GrpcClientConfig;

use crate::config::{OnError, OperationPolicy, ProbeSection};

/// Loop policy, independent of how the client is built.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub operation: OperationPolicy,
    pub on_error: OnError,
    pub iterations: Option<u64>,
}

impl From<&ProbeSection> for ProbeSettings {
    fn from(section: &ProbeSection) -> Self {
        Self {
            interval: section.interval,
            operation: section.operation,
            on_error: section.on_error,
            iterations: section.iterations,
        }
    }
}

impl ProbeSettings {
    fn done(&self, calls: u64) -> bool {
        self.iterations.is_some_and(|limit| calls >= limit)
    }
}

pub struct Probe {
    client: Arc<dyn CalculatorClientV1>,
    settings: ProbeSettings,
}

impl Probe {
    #[must_use]
    pub fn new(client: Arc<dyn CalculatorClientV1>, settings: ProbeSettings) -> Self {
        Self { client, settings }
    }

    /// Call the calculator until `cancel` fires or the iteration limit is hit.
    ///
    /// Returns the number of calls issued. An in-flight call is abandoned
    /// when `cancel` fires.
    ///
    /// # Errors
    /// Returns the first failed call when the policy is [`OnError::Exit`].
    pub async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<u64> {
        let mut calls: u64 = 0;

        while !self.settings.done(calls) && !cancel.is_cancelled() {
            let (first, second) = {
                let mut rng = rand::rng();
                (rng.random::<f32>(), rng.random::<f32>())
            };
            let operation = self.settings.operation.pick(calls);
            let request = BinaryOperation::new(first, second, operation);

            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.client.calculate(request) => outcome,
            };
            calls += 1;

            match outcome {
                Ok(res) => tracing::info!(
                    first,
                    second,
                    operation = operation.as_str_name(),
                    result = res.result,
                    "calculated"
                ),
                Err(e) if self.settings.on_error == OnError::Continue => {
                    tracing::warn!(error = %e, call = calls, "probe call failed; continuing");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("probe call {calls} failed"));
                }
            }

            if self.settings.done(calls) {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        Ok(calls)
    }
}

/// Harness listener that connects to the calculator and runs the [`Probe`].
///
/// Reaching the iteration limit ends the whole process cleanly; a connect
/// failure or a fatal call failure ends it with an error.
pub struct ProbeListener {
    endpoint: String,
    client_config: GrpcClientConfig,
    instrumentation: Instrumentation,
    settings: ProbeSettings,
    status: ListenerStatus,
}

impl ProbeListener {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        client_config: GrpcClientConfig,
        instrumentation: Instrumentation,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_config,
            instrumentation,
            settings,
            status: ListenerStatus::new(),
        }
    }
}

#[async_trait]
impl Listener for ProbeListener {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn status(&self) -> &ListenerStatus {
        &self.status
    }

    async fn serve(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        self.status.set(ListenerState::Binding);
        tracing::info!(endpoint = %self.endpoint, "connecting to calculator");
        let client = match CalculatorGrpcClient::connect(
            &self.endpoint,
            &self.client_config,
            self.instrumentation.clone(),
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                self.status.set(ListenerState::Failed(e.to_string()));
                return Err(e).with_context(|| format!("probe cannot reach {}", self.endpoint));
            }
        };
        self.status.set(ListenerState::Running);

        let probe = Probe::new(Arc::new(client), self.settings);
        match probe.run(&cancel).await {
            Ok(calls) => {
                self.status.set(ListenerState::Stopped);
                if !cancel.is_cancelled() {
                    tracing::info!(calls, "probe finished; shutting down");
                    cancel.cancel();
                }
                Ok(())
            }
            Err(e) => {
                self.status.set(ListenerState::Failed(format!("{e:#}")));
                Err(e)
            }
        }
    }
}
