//! canbridged - CAN to MQTT gateway daemon
//!
//! Joins WiFi, brings up the CAN controller, connects to the MQTT broker
//! and forwards every received frame as a JSON record. A small web page
//! on port 8885 shows the link state and edits the persisted settings.
//!
//! Usage:
//!   canbridged                              # can0 via SocketCAN, NetworkManager WiFi
//!   canbridged --config canbridged.toml     # explicit deployment config
//!   canbridged -i vcan0 -p 8080 -v          # overrides and debug logging

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use canbridge_api::{create_router, AppState, ConfigServer};
use canbridge_core::{
    BridgeSupervisor, CanController, ConfigStore, JsonFileStorage, MockCanController,
    MqttConnector, NmcliWireless, SettingsStorage, StaticLink, WirelessLink,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{CanBackend, CanConfig, DaemonConfig, WifiBackend, WifiConfig};

#[derive(Parser, Debug)]
#[command(name = "canbridged")]
#[command(about = "CAN to MQTT gateway with a web configuration page")]
struct Args {
    /// Path to the TOML deployment config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the persisted settings document (overrides config)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// CAN interface (overrides config)
    #[arg(short, long)]
    interface: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "canbridged=debug,canbridge_core=debug,canbridge_api=debug,tower_http=debug"
    } else {
        "canbridged=info,canbridge_core=info,canbridge_api=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            DaemonConfig::load(path)?
        }
        None => DaemonConfig::default(),
    };
    if let Some(settings) = args.settings {
        config.settings_file = settings;
    }
    if let Some(interface) = args.interface {
        config.can.interface = interface;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }

    info!(
        can = %config.can.interface,
        wifi = %config.wifi.interface,
        settings = %config.settings_file.display(),
        "Starting canbridged"
    );

    let storage: Arc<dyn SettingsStorage> = Arc::new(JsonFileStorage::new(&config.settings_file));
    let store = ConfigStore::load(storage);
    let connector = Arc::new(MqttConnector::new(
        config.mqtt.keep_alive(),
        config.mqtt.timeout(),
    ));

    let supervisor = Arc::new(BridgeSupervisor::from_parts(
        store,
        create_wireless(&config.wifi),
        connector,
        create_controller(&config.can)?,
        config.bridge_options(),
    ));
    if config.bridge.autostart {
        supervisor.start();
    }

    supervisor.initialize().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bridge_task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(shutdown_rx).await }
    });

    let app = create_router(
        AppState::new(ConfigServer::new(supervisor)),
        config.http.request_timeout(),
    );

    let addr = SocketAddr::new(config.http.listen, config.http.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Config page at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    bridge_task.await?;
    info!("canbridged stopped");

    Ok(())
}

fn create_wireless(wifi: &WifiConfig) -> Box<dyn WirelessLink> {
    match wifi.backend {
        WifiBackend::Nmcli => Box::new(NmcliWireless::new(wifi.interface.clone())),
        WifiBackend::Static => {
            info!("WiFi managed externally, treating network as up");
            Box::new(StaticLink::new(wifi.address))
        }
    }
}

fn create_controller(can: &CanConfig) -> anyhow::Result<Box<dyn CanController>> {
    match can.backend {
        CanBackend::Mock => {
            warn!("Using mock CAN controller, no bus traffic will be seen");
            Ok(Box::new(MockCanController::new()))
        }
        CanBackend::Socketcan => socketcan_controller(can),
    }
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
fn socketcan_controller(can: &CanConfig) -> anyhow::Result<Box<dyn CanController>> {
    Ok(Box::new(canbridge_core::SocketCanController::new(
        can.interface.clone(),
        can.manage_interface,
    )))
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
fn socketcan_controller(_can: &CanConfig) -> anyhow::Result<Box<dyn CanController>> {
    anyhow::bail!("SocketCAN support is not available in this build; set [can] backend = \"mock\"")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
