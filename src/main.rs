//! jsonfsm - declarative state machine interpreter
//!
//! Loads a machine definition, binds the builtin actions, and applies events
//! submitted over HTTP.

use clap::Parser;
use colored::Colorize;
use jsonfsm_core::{MachineDefinition, StateMachineEngine};
use jsonfsm_server::{run_metrics_server, Config, Metrics, Server, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jsonfsm")]
#[command(about = "Run a finite state machine described in JSON and drive it over HTTP")]
#[command(version)]
struct Cli {
    /// Machine definition file (JSON, or YAML with a .yaml/.yml extension)
    machine_file: PathBuf,

    /// Server configuration file (YAML)
    #[arg(short, long, env = "JSONFSM_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the event endpoint
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_bind: Option<SocketAddr>,

    /// Validate the machine file and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if cli.check {
        check(&cli);
    }

    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(addr) = cli.bind {
        config.network.bind_addr = addr;
    }
    if let Some(addr) = cli.metrics_bind {
        config.metrics.enabled = true;
        config.metrics.bind_addr = addr;
    }
    config.validate()?;

    let definition = match MachineDefinition::from_file(&cli.machine_file) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to load machine: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting jsonfsm");
    tracing::info!("  Machine: {}", cli.machine_file.display());
    tracing::info!(
        "  States: {}, transitions: {}, checksum: {}",
        definition.states().len(),
        definition.transitions().len(),
        definition.checksum
    );
    tracing::info!("  Bind address: {}", config.network.bind_addr);

    let engine = Arc::new(StateMachineEngine::with_builtins(definition));
    if let Err(e) = engine.init() {
        tracing::error!("Failed to initialize state machine: {}", e);
        return Err(e.into());
    }

    let mut server_config = ServerConfig::new(config.network.bind_addr)
        .with_max_body_bytes(config.network.max_body_bytes);

    let (metrics_shutdown, _) = broadcast::channel(1);
    let metrics_handle = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        tracing::info!("  Metrics: enabled ({})", config.metrics.bind_addr);

        let addr = config.metrics.bind_addr;
        let rx = metrics_shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, rx).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        }))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server = Arc::new(Server::new(server_config, engine.clone()));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_metrics = metrics_shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        let _ = shutdown_metrics.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    tracing::info!(
        "Server stopped in state '{}'",
        engine.current_state().unwrap_or_default()
    );
    Ok(())
}

/// Validates the machine file, prints a summary and exits.
fn check(cli: &Cli) -> ! {
    let definition = match MachineDefinition::from_file(&cli.machine_file) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    for warning in definition.warnings() {
        println!("{}: {}", "Warning".yellow(), warning);
    }
    println!(
        "{} {}: {} states, {} transitions, initial '{}', checksum {}",
        "OK".green(),
        cli.machine_file.display(),
        definition.states().len(),
        definition.transitions().len(),
        definition.initial_state().name,
        definition.checksum
    );
    std::process::exit(0);
}
