//! blaster: Background daemon that mirrors call activity on an IR status light
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Camera/microphone detection via the macOS unified log
//! - A debounced Idle/Active/Cooldown state machine
//! - A Bluetooth LE link to the IR blaster, with reconnect and heartbeat
//!
//! When a call starts the `Active` commands are sent; once the camera and
//! microphone have been released for the idle delay, the `Idle` commands
//! follow.

mod activity;
mod bridge;
mod config;
mod dispatch;
mod events;
mod lifecycle;
mod state;
#[cfg(test)]
mod testing;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::activity::ActivityMonitor;
use crate::bridge::Bridge;
use crate::config::Config;
use crate::lifecycle::ShutdownSignal;
use crate::transport::BleTransport;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "blaster", version, about = "Drive an IR blaster status light from camera/mic activity")]
struct Cli {
    /// Path to the YAML config file (default: ./config.yaml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "blaster starting");

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(
        device = %config.ble.device_name,
        idle_delay_secs = config.events.idle_delay().as_secs(),
        "configuration loaded"
    );

    let monitor = ActivityMonitor::new();
    let initial = monitor.snapshot().await;
    info!(
        camera = initial.camera,
        microphone = initial.microphone,
        "initial camera/mic state"
    );

    // Activity monitor -> bridge
    let (activity_tx, activity_rx) = mpsc::channel(32);
    let producer = tokio::spawn(async move {
        if let Err(e) = monitor.stream(activity_tx).await {
            error!(error = %e, "activity stream error");
        }
    });

    let transport = Arc::new(BleTransport::new(config.ble.device_name.clone()));
    let bridge = Bridge::new(transport, config.events);
    let shutdown = ShutdownSignal::new();

    let result = bridge.run(initial, activity_rx, shutdown.wait()).await;

    producer.abort();
    result?;

    info!("blaster stopped");
    Ok(())
}
