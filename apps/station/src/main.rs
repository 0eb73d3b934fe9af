//! # Nimbus Station Daemon
//!
//! Wires the sensor bus, the sync engine, and the local bridge together:
//! a fixed 5-second tick samples the sensors, every sample is queued for
//! cloud upload and mirrored to the foreground process, and bridge traffic
//! in the other direction (value requests, local `Config*` edits) is
//! answered here.

mod sensors;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use nimbus_core::{LocalMessage, TelemetryReading};
use nimbus_sync::{
    BridgeHandle, EnvCredentialSource, LocalBridge, SendCoordinator, StationConfig,
    WsCloudConnector,
};

use crate::sensors::{SensorBus, SimulatedSensors};

#[derive(Parser, Debug)]
#[command(name = "stationd", about = "Nimbus weather station daemon")]
struct Args {
    /// Path to station.toml (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cloud WebSocket URL, overriding the config file.
    #[arg(long)]
    cloud_url: Option<String>,

    /// Local bridge socket path, overriding the config file.
    #[arg(long)]
    bridge_socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = StationConfig::load(args.config)?;
    if let Some(url) = args.cloud_url {
        config.cloud.url = url;
    }
    if let Some(path) = args.bridge_socket {
        config.bridge.socket_path = path;
    }
    config.validate()?;

    info!(name = %config.device.name, url = %config.cloud.url, "stationd starting");

    let (bridge, bridge_rx) = LocalBridge::spawn(config.bridge_config());
    let connector = Arc::new(WsCloudConnector::new(config.transport_config()));
    let credentials = Arc::new(EnvCredentialSource::new());
    let coordinator = Arc::new(
        SendCoordinator::new(
            connector,
            credentials,
            bridge.clone(),
            config.report_lock_timeout(),
        )
        .await,
    );
    if !coordinator.has_identity() {
        warn!("running without a device identity; telemetry stays local");
    }

    let latest: Arc<RwLock<Option<TelemetryReading>>> = Arc::new(RwLock::new(None));
    tokio::spawn(handle_bridge_requests(
        bridge_rx,
        bridge.clone(),
        coordinator.clone(),
        latest.clone(),
    ));

    let mut sensors = SimulatedSensors::new();
    let mut tick = tokio::time::interval(config.sample_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some(reading) = sensors.sample().await else {
                    debug!("sensor bus had no sample this tick");
                    continue;
                };
                *latest.write().await = Some(reading);

                if let Err(e) = coordinator.log_telemetry(reading).await {
                    warn!(error = %e, "telemetry sample rejected");
                }

                // Raw readings are mirrored to the foreground process.
                bridge
                    .send(
                        LocalMessage::new()
                            .set("temperature", reading.temperature_c)
                            .set("humidity", reading.humidity_pct)
                            .set("pressure", reading.pressure_pa),
                    )
                    .await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("stationd stopped");
    Ok(())
}

/// Handles traffic arriving from the foreground process.
///
/// Two message shapes come in over the bridge: `Config*`-prefixed value
/// pushes (local settings edits, reported up to the device twin) and
/// null-valued keys (requests for our last known sensor values).
async fn handle_bridge_requests(
    mut bridge_rx: mpsc::Receiver<LocalMessage>,
    bridge: BridgeHandle,
    coordinator: Arc<SendCoordinator>,
    latest: Arc<RwLock<Option<TelemetryReading>>>,
) {
    while let Some(message) = bridge_rx.recv().await {
        let edits: LocalMessage = message
            .values()
            .filter(|(key, _)| key.starts_with("Config"))
            .map(|(key, value)| (key.to_string(), Some(value.clone())))
            .collect();
        if !edits.is_empty() {
            debug!(keys = edits.len(), "reporting local configuration edit");
            if let Err(e) = coordinator.report_config(&edits).await {
                warn!(error = %e, "failed to report configuration edit");
            }
        }

        let snapshot = *latest.read().await;
        let mut reply = LocalMessage::new();
        for key in message.requested_keys() {
            match (key, snapshot) {
                ("temperature", Some(r)) => reply.insert(key, Some(r.temperature_c.into())),
                ("humidity", Some(r)) => reply.insert(key, Some(r.humidity_pct.into())),
                ("pressure", Some(r)) => reply.insert(key, Some(r.pressure_pa.into())),
                (_, None) => debug!(key, "value requested before first sample"),
                _ => warn!(key, "value requested for unknown key"),
            }
        }
        if !reply.is_empty() {
            bridge.send(reply).await;
        }
    }
}
