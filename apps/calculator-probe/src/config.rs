//! Probe configuration: `probe`, `telemetry` and `logging` sections.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use calculator_sdk::Operation;
use cloudcalc_host::{ConfigError, load_layered, normalize_listen_addr};
use cloudcalc_telemetry::config::duration;
use cloudcalc_telemetry::{Exporter, LoggingConfig, TelemetryConfig};
use cloudcalc_transport_grpc::client::GrpcClientConfig;

const DEFAULT_SERVICE_NAME: &str = "grpc-cloudrun-client";
const DEFAULT_IDENTITY: &str = "rust";
const DEFAULT_GRPC_ENDPOINT: &str = ":50051";
const DEFAULT_DIAGNOSTICS_ENDPOINT: &str = ":9997";

/// Effective probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub probe: ProbeSection,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe: ProbeSection::default(),
            telemetry: TelemetryConfig {
                service_name: DEFAULT_SERVICE_NAME.to_owned(),
                identity: DEFAULT_IDENTITY.to_owned(),
                reporting_period: Duration::from_secs(5),
                ..TelemetryConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }
}

/// Which operation each probe call asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationPolicy {
    #[default]
    Add,
    Subtract,
    /// ADD on even iterations, SUBTRACT on odd ones.
    Alternate,
}

impl OperationPolicy {
    #[must_use]
    pub fn pick(self, iteration: u64) -> Operation {
        let add = match self {
            Self::Add => true,
            Self::Subtract => false,
            Self::Alternate => iteration % 2 == 0,
        };
        if add { Operation::Add } else { Operation::Subtract }
    }
}

/// What a failed call does to the probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Terminate the process.
    #[default]
    Exit,
    /// Log and keep calling on the normal interval.
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    /// Calculator address: full URI, `host:port` or `:port` (loopback).
    pub grpc_endpoint: String,
    pub diagnostics_endpoint: String,
    /// Pause between calls.
    #[serde(with = "duration")]
    pub interval: Duration,
    pub operation: OperationPolicy,
    pub on_error: OnError,
    /// Stop after this many calls; unset runs forever.
    pub iterations: Option<u64>,
    #[serde(with = "duration")]
    pub connect_timeout: Duration,
    #[serde(with = "duration")]
    pub rpc_timeout: Duration,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            grpc_endpoint: DEFAULT_GRPC_ENDPOINT.to_owned(),
            diagnostics_endpoint: DEFAULT_DIAGNOSTICS_ENDPOINT.to_owned(),
            interval: Duration::from_secs(15),
            operation: OperationPolicy::default(),
            on_error: OnError::default(),
            iterations: None,
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}

impl ProbeSection {
    #[must_use]
    pub fn client_config(&self) -> GrpcClientConfig {
        GrpcClientConfig::new("calculator")
            .with_connect_timeout(self.connect_timeout)
            .with_rpc_timeout(self.rpc_timeout)
    }
}

/// Values taken from the command line; they win over every other layer.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub grpc_endpoint: Option<String>,
    pub diagnostics_endpoint: Option<String>,
    pub collector_endpoint: Option<String>,
    pub iterations: Option<u64>,
}

impl ProbeConfig {
    /// Defaults, then the YAML file, then `CLOUDCALC__*` environment variables.
    ///
    /// # Errors
    /// See [`load_layered`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_layered(path)
    }

    pub fn apply_cli_overrides(&mut self, cli: CliOverrides) {
        if let Some(addr) = cli.grpc_endpoint {
            self.probe.grpc_endpoint = addr;
        }
        if let Some(addr) = cli.diagnostics_endpoint {
            self.probe.diagnostics_endpoint = addr;
        }
        if let Some(endpoint) = cli.collector_endpoint {
            match self.telemetry.exporter.as_mut() {
                Some(exporter) => exporter.endpoint = endpoint,
                None => self.telemetry.exporter = Some(Exporter::new(endpoint)),
            }
        }
        if cli.iterations.is_some() {
            self.probe.iterations = cli.iterations;
        }
    }

    /// Check the addresses and return the diagnostics listen address.
    ///
    /// # Errors
    /// Fails if the server endpoint is empty or the diagnostics address is malformed.
    pub fn validate(&self) -> Result<SocketAddr, ConfigError> {
        if self.probe.grpc_endpoint.trim().is_empty() {
            return Err(ConfigError::MissingServerEndpoint);
        }
        normalize_listen_addr(&self.probe.diagnostics_endpoint)
    }
}
