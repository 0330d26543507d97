//! # saint-tracker
//!
//! Waypoint relay binary. Wires settings, telemetry, storage and the hub
//! together and serves HTTP + WebSocket until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracker_server::{
    DeviceAuthCache, DeviceAuthenticator, Hub, HubConfig, ServerConfig, TrackerServer,
    WaypointService,
};
use tracker_settings::TrackerSettings;
use tracker_store::{Database, DeviceRepo, WaypointRepo};
use tracker_telemetry::TelemetryConfig;

/// Real-time waypoint relay.
#[derive(Parser, Debug)]
#[command(name = "saint-tracker", about = "Real-time waypoint relay")]
struct Cli {
    /// Settings file (defaults to `~/.saint-tracker/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default).
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage provisioned devices.
    #[command(subcommand)]
    Device(DeviceCommand),
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Provision a device with its shared token.
    Add {
        #[arg(long)]
        serial: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        name: Option<String>,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<TrackerSettings> {
    let path = path.cloned().unwrap_or_else(tracker_settings::settings_path);
    tracker_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn open_database(settings: &TrackerSettings) -> Result<Database> {
    let path = settings.database.path.clone();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Database::open(&path).with_context(|| format!("Failed to open database {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_ref())?;

    tracker_telemetry::init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        module_levels: Vec::new(),
        json: settings.logging.json,
    })
    .context("Failed to initialize logging")?;

    match cli.command {
        Some(Command::Device(DeviceCommand::Add {
            serial,
            token,
            name,
        })) => {
            let db = open_database(&settings)?;
            let row = DeviceRepo::new(db)
                .register(&serial, &token, name.as_deref())
                .with_context(|| format!("Failed to register device {serial}"))?;
            tracing::info!(device_id = row.id, serial_number = %row.serial_number, "device added");
            Ok(())
        }
        Some(Command::Serve { host, port }) => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings).await
        }
        None => serve(settings).await,
    }
}

async fn serve(settings: TrackerSettings) -> Result<()> {
    let db = open_database(&settings)?;
    let metrics = tracker_telemetry::install_recorder()
        .context("Failed to install metrics recorder")?;

    let hub = Hub::start(HubConfig::from_settings(&settings));
    let service = Arc::new(WaypointService::new(
        Arc::new(WaypointRepo::new(db.clone())),
        hub.clone(),
    ));
    let cache = Arc::new(DeviceAuthCache::start(
        settings.auth.cache_ttl(),
        settings.auth.sweep_interval(),
    ));
    let authenticator = Arc::new(DeviceAuthenticator::new(
        Arc::clone(&cache),
        Arc::new(DeviceRepo::new(db)),
    ));

    let handle = TrackerServer::new(ServerConfig::from_settings(&settings), hub, service, authenticator)
        .with_metrics(metrics)
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        "saint-tracker listening on http://{} (database {})",
        handle.addr(),
        settings.database.path.display()
    );

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    handle.shutdown().await;
    cache.stop();
    cache.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
