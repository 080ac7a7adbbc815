//! dhcpmux - DHCP relay multiplexer
//!
//! This is the main entry point for the dhcpmux daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};
use dhcpmux::client::is_server_with_defaults;
use dhcpmux::config::{load_config, ConfigSource};
use dhcpmux::lifecycle::Fiber;
use dhcpmux::relay::RelayController;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// dhcpmux - relay DHCP requests from many TCP clients through one daemon
#[derive(Parser, Debug)]
#[command(name = "dhcpmux")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay daemon (default)
    Run,
    /// Check whether a host runs a DHCP server, through a running daemon
    Probe {
        /// Host to probe
        target: Ipv4Addr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(args.config).await,
        Command::Probe { target } => probe(args.config, target).await,
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    info!("dhcpmux v{}", dhcpmux::VERSION);
    info!("Configuration loaded from: {:?}", config_path);

    // The controller re-reads the file on every start.
    let controller = RelayController::new(ConfigSource::File(config_path));
    controller.start().await?;

    wait_for_shutdown().await;

    controller.stop().await;
    Ok(())
}

async fn probe(config_path: PathBuf, target: Ipv4Addr) -> Result<()> {
    let config = load_config(&config_path)?;

    match is_server_with_defaults(&config.probe, target).await? {
        Some(elapsed) => println!("{} is a DHCP server ({} ms)", target, elapsed.as_millis()),
        None => println!("{}: no response", target),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to setup SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
