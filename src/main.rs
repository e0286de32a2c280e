//! Modbus register tracing service
//!
//! Runs in three modes: app mode driven by a JSON config file, demo mode
//! against the built-in power meter simulator, and a direct `trace`
//! command for ad-hoc polling from the command line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use regtrace::actions;
use regtrace::client::ModbusPoller;
use regtrace::config::{AppConfig, TransportKind};
use regtrace::register_map::RegisterMap;
use regtrace::sim::{
    run_demo_server, spawn_updater, DeviceStore, DEMO_HOST, DEMO_PORT, POWER_METER_MAP_JSON,
};
use regtrace::sink::TracingSink;

/// Simulator store tick, deliberately faster than any client poll interval
const SIM_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "regtrace",
    version,
    about = "Read, write and monitor Modbus registers"
)]
struct Cli {
    /// Path to JSON configuration file
    #[arg(long, env = "REGTRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Run with the built-in power meter simulator
    #[arg(long)]
    demo: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run demo mode with a simulated 3-phase power meter
    Demo,
    /// Poll registers from the command line without a config file
    Trace {
        /// TCP host address
        host: String,

        /// Path to a JSON register map file
        register_map: Option<PathBuf>,

        /// Modbus TCP port
        #[arg(short, long, default_value_t = 502)]
        port: u16,

        /// Modbus unit/slave ID
        #[arg(short, long, default_value_t = 1)]
        unit_id: u8,

        /// Poll interval in seconds
        #[arg(short, long, default_value_t = 1.0)]
        interval: f64,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 3.0)]
        timeout: f64,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("regtrace={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancel the shutdown token on SIGINT or SIGTERM
fn install_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutting down...");
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Demo) => {
            let mut config = AppConfig::load(cli.config.as_deref())?;
            config.demo = true;
            run_app(config).await
        }
        Some(Command::Trace {
            host,
            register_map,
            port,
            unit_id,
            interval,
            timeout,
        }) => {
            let config = AppConfig {
                transport: TransportKind::Tcp,
                host,
                port,
                unit_id,
                timeout,
                poll_interval: interval,
                register_map_file: register_map,
                ..AppConfig::default()
            };
            run_app(config).await
        }
        None => {
            let mut config = AppConfig::load(cli.config.as_deref())?;
            config.demo = config.demo || cli.demo;
            run_app(config).await
        }
    }
}

async fn run_app(mut config: AppConfig) -> anyhow::Result<()> {
    init_logging(&config.log_level);

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone());

    let mut _updater = None;
    if config.demo {
        info!("Demo mode: using built-in power meter simulator");
        let store = Arc::new(RwLock::new(DeviceStore::with_power_meter_defaults()));
        let addr: SocketAddr = format!("{DEMO_HOST}:{DEMO_PORT}").parse()?;
        let server_shutdown = shutdown.clone();
        let server_store = store.clone();
        let _server = tokio::spawn(async move {
            if let Err(e) = run_demo_server(addr, server_store, server_shutdown).await {
                tracing::error!("Demo server error: {e}");
            }
        });
        _updater = Some(spawn_updater(store, SIM_UPDATE_INTERVAL, shutdown.clone()));

        // Point the client at the local simulator
        config.transport = TransportKind::Tcp;
        config.host = DEMO_HOST.to_string();
        config.port = DEMO_PORT;

        // Give the server a moment to bind before the first connect
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let register_map = if config.demo {
        let doc = serde_json::from_str(POWER_METER_MAP_JSON)
            .context("embedded power meter map is invalid JSON")?;
        Some(RegisterMap::from_document(doc)?)
    } else {
        match &config.register_map_file {
            Some(path) => Some(RegisterMap::from_file(path)?),
            None => None,
        }
    };

    if let Some(map) = &register_map {
        info!(
            "Loaded register map '{}' with {} registers",
            map.name,
            map.register_count()
        );
    } else {
        info!("No register map configured, on-demand access only");
    }

    let transport = config.build_transport();
    let mut poller = ModbusPoller::new(
        Box::new(transport),
        register_map,
        Box::new(TracingSink),
        config.poll_period(),
        shutdown,
    );

    // Hand the action table to the host registry (logged here; the
    // embedding framework consumes the descriptors)
    for action in actions::ACTIONS {
        debug!("action registered: {} - {}", action.name, action.description);
    }

    poller.run().await;
    Ok(())
}
