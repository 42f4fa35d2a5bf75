//! Telemetry configuration types
//!
//! These types define the `telemetry` section of a CloudCalc process config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_SERVICE_NAME: &str = "cloudcalc";
const DEFAULT_IDENTITY: &str = "rust";
const DEFAULT_SPAN_BUFFER: usize = 256;

/// Telemetry configuration: measure naming, export pipeline and in-process buffers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Reported as `service.name` and used to name the latency view.
    pub service_name: String,
    /// Caller identity attached to samples recorded by this process.
    pub identity: String,
    /// Collector to export to. `None` keeps telemetry in-process only.
    pub exporter: Option<Exporter>,
    /// How often aggregated metrics are pushed to the collector.
    #[serde(with = "duration")]
    pub reporting_period: Duration,
    pub sampler: Sampler,
    /// Capacity of the recent-spans ring buffer behind `/debug/tracez`.
    pub span_buffer: usize,
    /// Extra resource attributes.
    pub resource: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            identity: DEFAULT_IDENTITY.to_owned(),
            exporter: None,
            reporting_period: Duration::from_secs(60),
            sampler: Sampler::default(),
            span_buffer: DEFAULT_SPAN_BUFFER,
            resource: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Exporter {
    /// OTLP/gRPC collector address. `host:port`, `:port` and full URIs are accepted.
    pub endpoint: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, with = "duration::option")]
    pub timeout: Option<Duration>,
}

impl Exporter {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Sampler {
    ParentBasedAlwaysOn {},
    ParentBasedRatio {
        #[serde(skip_serializing_if = "Option::is_none")]
        ratio: Option<f64>,
    },
    AlwaysOn {},
    AlwaysOff {},
}

impl Default for Sampler {
    fn default() -> Self {
        Self::AlwaysOn {}
    }
}

/// Serde adapter for human readable durations (`"15s"`, `"1m 30s"`).
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use std::time::Duration;

    /// # Errors
    /// Fails when the serializer rejects a string.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    /// # Errors
    /// Fails when the value is not a valid humantime duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
        use std::time::Duration;

        /// # Errors
        /// Fails when the serializer rejects the value.
        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.collect_str(&humantime::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        /// # Errors
        /// Fails when the value is present but not a valid humantime duration.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| humantime::parse_duration(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}
