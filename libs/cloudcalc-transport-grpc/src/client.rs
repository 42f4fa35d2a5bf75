//! gRPC client transport configuration and connection utilities.
//!
//! This module provides the client side of the calculator transport:
//! - Configurable connect and RPC timeouts
//! - HTTP/2 keepalive settings for connection health
//! - A tracing span around connection establishment
//!
//! There is no retry layer. A failed connect or call is surfaced to the
//! caller as-is.

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::Instrument;

fn duration_to_i64_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Configuration for the gRPC client transport.
#[derive(Debug, Clone)]
pub struct GrpcClientConfig {
    /// Timeout for establishing the initial connection.
    pub connect_timeout: Duration,

    /// Timeout for individual RPC calls (applied at transport level).
    pub rpc_timeout: Duration,

    /// Service name for tracing.
    pub service_name: &'static str,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
            service_name: "grpc_client",
        }
    }
}

impl GrpcClientConfig {
    /// Create a new configuration with the given service name.
    #[must_use]
    pub fn new(service_name: &'static str) -> Self {
        Self {
            service_name,
            ..Default::default()
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the RPC timeout.
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }
}

/// Turn a configured server address into a URI tonic can dial.
///
/// Accepts full URIs (`http://host:port`), bare `host:port` and the
/// listen-style `:port` shorthand, which targets the loopback interface.
#[must_use]
pub fn normalize_uri(addr: &str) -> String {
    let addr = addr.trim();
    if addr.contains("://") {
        addr.to_owned()
    } else if let Some(port) = addr.strip_prefix(':') {
        format!("http://127.0.0.1:{port}")
    } else {
        format!("http://{addr}")
    }
}

/// Build a tonic `Endpoint` with timeouts and keepalive settings.
///
/// Configures:
/// - Connect timeout
/// - Per-RPC timeout
/// - TCP keepalive (30 seconds)
/// - HTTP/2 keepalive interval (30 seconds)
/// - Keepalive timeout (10 seconds)
/// - Keep alive while idle
fn build_endpoint(uri: String, cfg: &GrpcClientConfig) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(uri)?
        .connect_timeout(cfg.connect_timeout)
        .timeout(cfg.rpc_timeout)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .keep_alive_while_idle(true);

    Ok(endpoint)
}

/// Connect to a gRPC server with the configured transport stack.
///
/// `addr` goes through [`normalize_uri`] first. The returned channel is
/// handed to a generated client, e.g. `CalculatorClient::new(channel)`.
///
/// # Errors
/// Fails if the address is not a valid URI or the connection cannot be
/// established within `connect_timeout`. No retry is attempted.
pub async fn connect_channel(addr: &str, cfg: &GrpcClientConfig) -> anyhow::Result<Channel> {
    let uri = normalize_uri(addr);
    let span = tracing::debug_span!(
        "grpc_connect",
        service = cfg.service_name,
        uri = %uri
    );

    async move {
        let endpoint = build_endpoint(uri, cfg)?;
        let channel = endpoint.connect().await?;

        tracing::info!(
            service_name = cfg.service_name,
            connect_timeout_ms = duration_to_i64_ms(cfg.connect_timeout),
            rpc_timeout_ms = duration_to_i64_ms(cfg.rpc_timeout),
            "gRPC client connected"
        );

        Ok(channel)
    }
    .instrument(span)
    .await
}
