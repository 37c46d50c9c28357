//! StreamToy daemon
//!
//! Drives the button dock, the LED strip and the browser emulator, and runs
//! the built-in scenes on top of them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use streamtoy_daemon::runtime::Runtime;
use streamtoy_daemon::scenes::builtin_registry;
use streamtoy_daemon::Config;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamtoyd")]
#[command(about = "StreamToy button dock daemon")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(default_value = "config/default.toml")]
    config: PathBuf,

    /// Do not attach the USB dock
    #[arg(long)]
    no_hardware: bool,

    /// Do not start the browser emulator
    #[arg(long)]
    no_web: bool,

    /// Scene to enter instead of the configured one
    #[arg(long)]
    scene: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        let config = Config::load(&cli.config).context("Failed to load configuration")?;
        info!("Loaded configuration from: {}", cli.config.display());
        config
    } else {
        warn!(
            "Configuration {} not found, using defaults",
            cli.config.display()
        );
        Config::default()
    };
    if cli.no_hardware {
        config.hardware.enable = false;
    }
    if cli.no_web {
        config.web.enable = false;
    }

    let registry = builtin_registry();
    let start_scene = cli.scene.unwrap_or_else(|| config.start_scene.clone());
    if !registry.contains(&start_scene) {
        let known: Vec<_> = registry.names().collect();
        anyhow::bail!(
            "Unknown scene '{}' (available: {})",
            start_scene,
            known.join(", ")
        );
    }

    let mut runtime =
        Runtime::from_config(&config, registry).context("Failed to build runtime")?;
    let attached = runtime.start().context("No viewer could be started")?;
    info!("{} viewer(s) attached", attached);

    runtime
        .switch_scene(&start_scene)
        .await
        .with_context(|| format!("Failed to enter scene '{}'", start_scene))?;

    // Setup Unix signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    runtime
        .run(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                }
            }
        })
        .await;

    runtime.shutdown().await;
    Ok(())
}
