//! Process-wide telemetry registry
//!
//! Holds the latency measure, its tag keys and the OTLP export pipeline
//! (gRPC/tonic) for traces and metrics. The registry is constructed once at
//! startup, before any RPC is served, and shared as an `Arc` with the
//! listeners and clients that record into it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::metrics::{Histogram, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider, Tracer},
};
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::config::{Exporter, Sampler as SamplerConfig, TelemetryConfig};
use crate::error::TelemetryError;
use crate::instrument::{LatencyRecorder, LatencySample};
use crate::zpages::{RpcStats, SpanStore, SpanStoreLayer};

/// Tag key carrying the caller identity.
pub const TAG_CLIENT: &str = "client";
/// Tag key carrying the RPC method name.
pub const TAG_METHOD: &str = "method";

/// Histogram bucket boundaries of the latency view, in milliseconds.
pub const LATENCY_BOUNDARIES_MS: [f64; 10] = [
    10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10_000.0,
];

const METER_NAME: &str = "cloudcalc";

/// The process-wide telemetry state.
pub struct TelemetryRegistry {
    service_name: String,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    latency_ms: Histogram<f64>,
    rpc_stats: Arc<RpcStats>,
    span_store: Arc<SpanStore>,
    collector: Option<String>,
    reporting_period: Duration,
    shut_down: AtomicBool,
}

impl TelemetryRegistry {
    /// Build the registry: propagator, tracer/meter providers, latency measure
    /// and the in-process diagnostics buffers.
    ///
    /// When `cfg.exporter` is `None` nothing leaves the process, but spans and
    /// samples still reach the diagnostics buffers.
    ///
    /// # Errors
    /// Returns an error if an OTLP exporter cannot be built.
    pub fn init(cfg: &TelemetryConfig) -> Result<Self, TelemetryError> {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = build_resource(cfg);
        let mut tracer_builder = SdkTracerProvider::builder()
            .with_sampler(build_sampler(&cfg.sampler))
            .with_resource(resource.clone());
        let mut meter_builder = SdkMeterProvider::builder().with_resource(resource);

        let mut collector = None;
        if let Some(exporter) = &cfg.exporter {
            let endpoint = collector_uri(&exporter.endpoint);
            tracer_builder = tracer_builder.with_batch_exporter(build_span_exporter(exporter, &endpoint)?);
            let reader = PeriodicReader::builder(build_metric_exporter(exporter, &endpoint)?)
                .with_interval(cfg.reporting_period)
                .build();
            meter_builder = meter_builder.with_reader(reader);
            collector = Some(endpoint);
        }

        let tracer_provider = tracer_builder.build();
        let meter_provider = meter_builder.build();
        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        let latency_ms = meter_provider
            .meter(METER_NAME)
            .f64_histogram(format!("{}/latency", cfg.service_name))
            .with_unit("ms")
            .with_description("The latency in milliseconds.")
            .with_boundaries(LATENCY_BOUNDARIES_MS.to_vec())
            .build();

        Ok(Self {
            service_name: cfg.service_name.clone(),
            tracer_provider,
            meter_provider,
            latency_ms,
            rpc_stats: Arc::new(RpcStats::default()),
            span_store: Arc::new(SpanStore::new(cfg.span_buffer)),
            collector,
            reporting_period: cfg.reporting_period,
            shut_down: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Normalized collector URI; `None` when telemetry stays in-process.
    #[must_use]
    pub fn collector_endpoint(&self) -> Option<&str> {
        self.collector.as_deref()
    }

    /// Log where telemetry goes. Call once the subscriber is installed.
    pub fn log_export_target(&self) {
        match &self.collector {
            Some(endpoint) => tracing::info!(
                service = %self.service_name,
                %endpoint,
                reporting_period = %humantime::format_duration(self.reporting_period),
                "OTLP exporter config"
            ),
            None => tracing::info!(
                service = %self.service_name,
                "No collector configured; telemetry stays in-process"
            ),
        }
    }

    /// `tracing` layer bridging spans into the OpenTelemetry tracer.
    #[must_use]
    pub fn otel_layer<S>(&self) -> OpenTelemetryLayer<S, Tracer>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        let tracer = self.tracer_provider.tracer(self.service_name.clone());
        tracing_opentelemetry::layer().with_tracer(tracer)
    }

    /// `tracing` layer feeding closed RPC spans into the recent-spans buffer.
    #[must_use]
    pub fn span_layer(&self) -> SpanStoreLayer {
        SpanStoreLayer::new(Arc::clone(&self.span_store))
    }

    #[must_use]
    pub fn rpc_stats(&self) -> &Arc<RpcStats> {
        &self.rpc_stats
    }

    #[must_use]
    pub fn span_store(&self) -> &Arc<SpanStore> {
        &self.span_store
    }

    /// Flush and stop both providers. Safe to call more than once.
    ///
    /// # Errors
    /// Returns an error if a provider fails to shut down.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(service = %self.service_name, "Telemetry shutting down");

        if let Err(e) = self.meter_provider.force_flush() {
            tracing::warn!(error = %e, "metrics force_flush failed during shutdown");
        }
        let traces = self.tracer_provider.shutdown();
        let metrics = self.meter_provider.shutdown();
        traces.map_err(|e| TelemetryError::Shutdown(format!("tracer provider: {e}")))?;
        metrics.map_err(|e| TelemetryError::Shutdown(format!("meter provider: {e}")))?;
        Ok(())
    }
}

impl LatencyRecorder for TelemetryRegistry {
    fn record(&self, sample: &LatencySample) {
        self.latency_ms.record(
            sample.latency_ms,
            &[
                KeyValue::new(TAG_CLIENT, sample.identity.to_string()),
                KeyValue::new(TAG_METHOD, sample.method),
            ],
        );
        self.rpc_stats.record(sample);
        tracing::debug!(
            method = sample.method,
            identity = %sample.identity,
            latency_ms = sample.latency_ms,
            outcome = %sample.outcome,
            "Latency"
        );
    }
}

impl Drop for TelemetryRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "telemetry shutdown on drop failed");
        }
    }
}

/// Build resource with service name and custom attributes
fn build_resource(cfg: &TelemetryConfig) -> Resource {
    let mut attrs = vec![KeyValue::new("service.name", cfg.service_name.clone())];
    for (k, v) in &cfg.resource {
        attrs.push(KeyValue::new(k.clone(), v.clone()));
    }
    Resource::builder_empty().with_attributes(attrs).build()
}

/// Build sampler from configuration
fn build_sampler(cfg: &SamplerConfig) -> Sampler {
    match cfg {
        SamplerConfig::AlwaysOn {} => Sampler::AlwaysOn,
        SamplerConfig::AlwaysOff {} => Sampler::AlwaysOff,
        SamplerConfig::ParentBasedAlwaysOn {} => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
        SamplerConfig::ParentBasedRatio { ratio } => Sampler::ParentBased(Box::new(
            Sampler::TraceIdRatioBased(ratio.unwrap_or(0.1)),
        )),
    }
}

/// Normalize a collector address into a URI tonic can dial.
fn collector_uri(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_owned()
    } else if let Some(port) = endpoint.strip_prefix(':') {
        format!("http://127.0.0.1:{port}")
    } else {
        format!("http://{endpoint}")
    }
}

fn build_span_exporter(
    exporter: &Exporter,
    endpoint: &str,
) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
    let mut b = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint);
    if let Some(t) = exporter.timeout {
        b = b.with_timeout(t);
    }
    if let Some(md) = build_metadata(exporter) {
        b = b.with_metadata(md);
    }
    Ok(b.build()?)
}

fn build_metric_exporter(
    exporter: &Exporter,
    endpoint: &str,
) -> Result<opentelemetry_otlp::MetricExporter, TelemetryError> {
    let mut b = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint);
    if let Some(t) = exporter.timeout {
        b = b.with_timeout(t);
    }
    if let Some(md) = build_metadata(exporter) {
        b = b.with_metadata(md);
    }
    Ok(b.build()?)
}

fn build_metadata(exporter: &Exporter) -> Option<MetadataMap> {
    let mut md = MetadataMap::new();

    for (k, v) in &exporter.headers {
        match (
            MetadataKey::from_bytes(k.as_bytes()),
            MetadataValue::try_from(v.as_str()),
        ) {
            (Ok(key), Ok(val)) => {
                md.insert(key, val);
            }
            _ => tracing::warn!(%k, "Skipping invalid gRPC metadata header"),
        }
    }

    if md.is_empty() { None } else { Some(md) }
}
