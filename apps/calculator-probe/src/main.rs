use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

use calculator_probe::{CliOverrides, ProbeConfig, ProbeListener, ProbeSettings};
use cloudcalc_host::signals::cancel_on_shutdown;
use cloudcalc_host::{DiagnosticsListener, DiagnosticsState, Harness};
use cloudcalc_telemetry::{CallSide, Instrumentation, TelemetryRegistry, init_logging};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// CloudCalc probe - calls the calculator in a loop
#[derive(Parser)]
#[command(name = "calculator-probe")]
#[command(about = "CloudCalc probe - calls the calculator in a loop with client-side instrumentation")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Calculator address (overrides config)
    #[arg(long)]
    grpc_endpoint: Option<String>,

    /// Diagnostics pages listen address (overrides config)
    #[arg(long)]
    zpages_endpoint: Option<String>,

    /// OTLP collector address (overrides config)
    #[arg(long)]
    collector_endpoint: Option<String>,

    /// Stop after this many calls (overrides config)
    #[arg(long)]
    iterations: Option<u64>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start calling the calculator
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) defaults -> 2) YAML (if provided) -> 3) env (CLOUDCALC__*) -> 4) CLI overrides
    let mut config = ProbeConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(CliOverrides {
        grpc_endpoint: cli.grpc_endpoint,
        diagnostics_endpoint: cli.zpages_endpoint,
        collector_endpoint: cli.collector_endpoint,
        iterations: cli.iterations,
    });

    if cli.print_config {
        println!("Effective configuration:\n{}", to_json(&config)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_probe(&config, cli.verbose).await,
        Commands::Check => check_config(&config),
    }
}

fn to_json(config: &ProbeConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("Failed to serialize configuration to JSON")
}

fn check_config(config: &ProbeConfig) -> Result<()> {
    let diagnostics = config.validate()?;
    println!("Configuration is valid");
    println!("calculator endpoint: {}", config.probe.grpc_endpoint);
    println!("diagnostics endpoint: {diagnostics}");
    println!("{}", to_json(config)?);
    Ok(())
}

async fn run_probe(config: &ProbeConfig, verbose: u8) -> Result<()> {
    let diagnostics = config.validate()?;

    let registry = Arc::new(TelemetryRegistry::init(&config.telemetry)?);
    init_logging(&config.logging, verbose, Some(&registry))?;
    registry.log_export_target();

    let cancel = CancellationToken::new();
    let signals = cancel_on_shutdown(cancel.clone());

    let instrumentation = Instrumentation::new(
        registry.clone(),
        config.telemetry.identity.as_str(),
        CallSide::Client,
    );
    let probe = ProbeListener::new(
        config.probe.grpc_endpoint.as_str(),
        config.probe.client_config(),
        instrumentation,
        ProbeSettings::from(&config.probe),
    );

    let harness = Harness::new(cancel)
        .with(Arc::new(probe))
        .with(Arc::new(DiagnosticsListener::new(
            diagnostics,
            DiagnosticsState::from_registry(&registry),
        )));

    tracing::info!(
        endpoint = %config.probe.grpc_endpoint,
        %diagnostics,
        "CloudCalc probe starting"
    );
    let result = harness.run().await;
    signals.abort();

    match &result {
        Ok(()) => tracing::info!("CloudCalc probe stopped"),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "CloudCalc probe terminated"),
    }

    // Flush any remaining spans and metrics
    if let Err(e) = registry.shutdown() {
        tracing::warn!(error = %e, "telemetry shutdown failed");
    }

    result
}
