use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cloudcalc_host::{ConfigError, load_layered, normalize_listen_addr, resolve_rpc_addr};
use cloudcalc_telemetry::{Exporter, LoggingConfig, TelemetryConfig};

const DEFAULT_SERVICE_NAME: &str = "grpc-cloudrun-server";
const DEFAULT_DIAGNOSTICS_ENDPOINT: &str = ":9998";

/// Effective server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            telemetry: TelemetryConfig {
                service_name: DEFAULT_SERVICE_NAME.to_owned(),
                ..TelemetryConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// RPC listen address. Unset means "use `PORT`".
    pub grpc_endpoint: Option<String>,
    pub diagnostics_endpoint: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            grpc_endpoint: None,
            diagnostics_endpoint: DEFAULT_DIAGNOSTICS_ENDPOINT.to_owned(),
        }
    }
}

/// Values taken from the command line; they win over every other layer.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub grpc_endpoint: Option<String>,
    pub diagnostics_endpoint: Option<String>,
    pub collector_endpoint: Option<String>,
}

/// Listen addresses resolved from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ListenAddrs {
    pub rpc: SocketAddr,
    pub diagnostics: SocketAddr,
}

impl ServerConfig {
    /// Defaults, then the YAML file, then `CLOUDCALC__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_layered(path)
    }

    pub fn apply_cli_overrides(&mut self, cli: CliOverrides) {
        if let Some(addr) = cli.grpc_endpoint {
            self.server.grpc_endpoint = Some(addr);
        }
        if let Some(addr) = cli.diagnostics_endpoint {
            self.server.diagnostics_endpoint = addr;
        }
        if let Some(endpoint) = cli.collector_endpoint {
            match self.telemetry.exporter.as_mut() {
                Some(exporter) => exporter.endpoint = endpoint,
                None => self.telemetry.exporter = Some(Exporter::new(endpoint)),
            }
        }
    }

    /// Resolve both listen addresses; `port_env` is the value of `PORT`.
    pub fn listen_addrs(&self, port_env: Option<&str>) -> Result<ListenAddrs, ConfigError> {
        Ok(ListenAddrs {
            rpc: resolve_rpc_addr(self.server.grpc_endpoint.as_deref(), port_env)?,
            diagnostics: normalize_listen_addr(&self.server.diagnostics_endpoint)?,
        })
    }
}
