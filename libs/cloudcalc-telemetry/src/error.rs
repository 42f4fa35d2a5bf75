/// Errors raised while setting up or tearing down telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The OTLP exporter could not be built.
    #[error("OTLP exporter build error: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global `tracing` subscriber is already installed.
    #[error("failed to set global tracing subscriber: {0}")]
    Subscriber(String),

    /// Flushing or stopping a provider failed.
    #[error("telemetry shutdown failed: {0}")]
    Shutdown(String),
}
