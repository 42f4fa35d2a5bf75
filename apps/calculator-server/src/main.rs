#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

use calculator::{CalculatorServiceImpl, GrpcListener, Service};
use cloudcalc_host::signals::cancel_on_shutdown;
use cloudcalc_host::{DiagnosticsListener, DiagnosticsState, Harness};
use cloudcalc_telemetry::{CallSide, Instrumentation, TelemetryRegistry, init_logging};

use crate::config::{CliOverrides, ServerConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// CloudCalc server - instrumented gRPC calculator
#[derive(Parser)]
#[command(name = "calculator-server")]
#[command(about = "CloudCalc server - instrumented gRPC calculator with diagnostics pages")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// gRPC listen address (overrides config; falls back to PORT)
    #[arg(long)]
    grpc_endpoint: Option<String>,

    /// Diagnostics pages listen address (overrides config)
    #[arg(long)]
    zpages_endpoint: Option<String>,

    /// OTLP collector address (overrides config)
    #[arg(long)]
    collector_endpoint: Option<String>,

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
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) defaults -> 2) YAML (if provided) -> 3) env (CLOUDCALC__*) -> 4) CLI overrides
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(CliOverrides {
        grpc_endpoint: cli.grpc_endpoint,
        diagnostics_endpoint: cli.zpages_endpoint,
        collector_endpoint: cli.collector_endpoint,
    });

    if cli.print_config {
        println!("Effective configuration:\n{}", to_json(&config)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(&config, cli.verbose).await,
        Commands::Check => check_config(&config),
    }
}

fn to_json(config: &ServerConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("Failed to serialize configuration to JSON")
}

fn check_config(config: &ServerConfig) -> Result<()> {
    let addrs = config.listen_addrs(std::env::var("PORT").ok().as_deref())?;
    println!("Configuration is valid");
    println!("gRPC endpoint: {}", addrs.rpc);
    println!("diagnostics endpoint: {}", addrs.diagnostics);
    println!("{}", to_json(config)?);
    Ok(())
}

async fn run_server(config: &ServerConfig, verbose: u8) -> Result<()> {
    // Address problems are fatal before anything binds.
    let addrs = config.listen_addrs(std::env::var("PORT").ok().as_deref())?;

    // Telemetry is registered before the first RPC can be served.
    let registry = Arc::new(TelemetryRegistry::init(&config.telemetry)?);
    init_logging(&config.logging, verbose, Some(&registry))?;
    registry.log_export_target();

    let cancel = CancellationToken::new();
    let signals = cancel_on_shutdown(cancel.clone());

    let instrumentation = Instrumentation::new(
        registry.clone(),
        config.telemetry.identity.as_str(),
        CallSide::Server,
    );
    let service = CalculatorServiceImpl::new(Service::new(), instrumentation, cancel.clone());

    let harness = Harness::new(cancel)
        .with(Arc::new(GrpcListener::new(addrs.rpc, service)))
        .with(Arc::new(DiagnosticsListener::new(
            addrs.diagnostics,
            DiagnosticsState::from_registry(&registry),
        )));

    tracing::info!(rpc = %addrs.rpc, diagnostics = %addrs.diagnostics, "CloudCalc server starting");
    let result = harness.run().await;
    signals.abort();

    match &result {
        Ok(()) => tracing::info!("CloudCalc server stopped"),
        Err(e) => tracing::error!(error = %format!("{e:#}"), "CloudCalc server terminated"),
    }

    // Flush any remaining spans and metrics
    if let Err(e) = registry.shutdown() {
        tracing::warn!(error = %e, "telemetry shutdown failed");
    }

    result
}
