//! Process logging
//!
//! One `tracing_subscriber` registry carries the human-facing log output
//! (stderr, text or JSON) next to the OpenTelemetry bridge and the
//! recent-spans layer, so a single `tracing` span feeds all three.

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{Layer, Registry};

use crate::error::TelemetryError;
use crate::registry::TelemetryRegistry;

/// Noisy transport crates are capped regardless of the requested level.
const TRANSPORT_DIRECTIVES: &str = "h2=info,hyper_util=info,tower=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive, e.g. `info` or `warn,calculator=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// `verbose` is the `-v` count from the command line and overrides
/// `cfg.level`; `RUST_LOG` overrides both. When `registry` is given its
/// OpenTelemetry and recent-spans layers are attached.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    cfg: &LoggingConfig,
    verbose: u8,
    registry: Option<&TelemetryRegistry>,
) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| build_filter(effective_level(&cfg.level, verbose)));

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(3);
    layers.push(match cfg.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    });

    if let Some(registry) = registry {
        layers.push(
            registry
                .otel_layer::<Registry>()
                .with_filter(LevelFilter::INFO)
                .boxed(),
        );
        layers.push(registry.span_layer().with_filter(LevelFilter::INFO).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

fn effective_level(configured: &str, verbose: u8) -> &str {
    match verbose {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("{level},{TRANSPORT_DIRECTIVES}")).unwrap_or_else(|e| {
        eprintln!("invalid log level '{level}' ({e}); falling back to info");
        EnvFilter::new(format!("info,{TRANSPORT_DIRECTIVES}"))
    })
}
