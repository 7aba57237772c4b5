//! Wristlink companion entry point.
//!
//! Wires the session, device registry, readiness gate and correlator
//! together and runs one command against the nearby watch.  Without a vendor
//! SDK binding the binary runs headless against the simulated transport,
//! seeded from the `[simulator]` config section and answering like a watch
//! running the companion app.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config            -- TOML, defaults on first run
//!  └─ SimulatedTransport     -- stands in for the vendor SDK
//!  └─ SessionManager         -- ensure_ready()
//!  └─ DeviceRegistry         -- poll loop (Tokio task)
//!  └─ Correlator             -- query / send
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wristlink_companion::application::app_gate::AppReadinessGate;
use wristlink_companion::application::correlator::{Correlator, FailureClass};
use wristlink_companion::application::device_registry::DeviceRegistry;
use wristlink_companion::application::session::SessionManager;
use wristlink_companion::application::transport::VendorTransport;
use wristlink_companion::infrastructure::storage::config::{self, AppConfig};
use wristlink_companion::infrastructure::transport::simulated::SimulatedTransport;
use wristlink_core::protocol::messages::{DeviceInfo, Pong, PROTOCOL_VERSION};
use wristlink_core::{
    decode_command, encode_response, Command, DeviceId, DeviceList, Response, ResponseType, Value,
};

#[derive(Debug, Parser)]
#[command(name = "wristlink-companion", version, about = "Talk to a nearby Wristlink watch")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "WRISTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "WRISTLINK_LOG")]
    log_level: Option<String>,

    /// Device to address instead of the first connected one
    #[arg(long)]
    device: Option<u64>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// List nearby devices
    Devices,
    /// Check that the watch app answers
    Ping {
        #[arg(long, default_value_t = 1)]
        token: i64,
    },
    /// Show the watch app's version and screen
    Info,
    /// Write the default config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => config::load_config().context("loading config")?,
    };

    // Level precedence: RUST_LOG, then --log-level, then the config file.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.companion.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    if matches!(cli.command, CliCommand::InitConfig) {
        return init_config(cli.config.as_deref(), &cfg);
    }

    info!("Wristlink companion starting (headless, simulated transport)");

    let sim = Arc::new(SimulatedTransport::new());
    sim.set_known_devices(cfg.simulator.devices.iter().map(|d| d.to_device()).collect());
    sim.set_responder(Box::new(simulated_watch));
    let transport: Arc<dyn VendorTransport> = sim;

    let session = Arc::new(SessionManager::new(Arc::clone(&transport)));
    let registry = DeviceRegistry::new(Arc::clone(&transport), cfg.registry.poll_interval());
    let gate = AppReadinessGate::new(
        Arc::clone(&transport),
        Arc::clone(&session),
        cfg.companion.app_id.clone(),
        cfg.correlator.gate_step_timeout(),
    );
    let correlator = Correlator::new(
        Arc::clone(&transport),
        Arc::clone(&session),
        gate,
        registry.clone(),
        cfg.correlator.timings(),
    );

    session
        .ensure_ready()
        .await
        .map_err(|e| anyhow!("{e} ({:?})", FailureClass::from(&e)))?;

    let mut devices = registry.subscribe();
    if tokio::time::timeout(Duration::from_secs(5), devices.changed())
        .await
        .is_err()
    {
        warn!("no device list published yet");
    }

    let preferred = cli.device.map(DeviceId).or(cfg.companion.preferred_device_id());
    let outcome = run(&cli.command, &correlator, &registry.snapshot(), preferred).await;

    registry.shutdown();
    session.teardown();
    info!("Wristlink companion stopped");
    outcome
}

async fn run(
    command: &CliCommand,
    correlator: &Correlator,
    devices: &DeviceList,
    preferred: Option<DeviceId>,
) -> anyhow::Result<()> {
    match command {
        CliCommand::Devices => {
            for device in devices.iter() {
                println!("{:>12}  {:<20} {:?}", device.id, device.name, device.status);
            }
            Ok(())
        }
        CliCommand::Ping { token } => {
            let response = correlator
                .query_current(preferred, Command::Ping { token: *token }, ResponseType::Pong)
                .await
                .map_err(|e| anyhow!("ping failed: {e} ({:?})", e.class()))?;
            println!("{response:?}");
            Ok(())
        }
        CliCommand::Info => {
            let device = correlator
                .query_current(preferred, Command::RequestDeviceInfo, ResponseType::DeviceInfo)
                .await
                .map_err(|e| anyhow!("device info failed: {e} ({:?})", e.class()))?;
            match device {
                Response::DeviceInfo(info) => {
                    println!(
                        "app {} (protocol {}), screen {}x{}",
                        info.app_version, info.protocol_version, info.screen_width, info.screen_height
                    );
                    if info.protocol_version != PROTOCOL_VERSION {
                        warn!(
                            watch = info.protocol_version,
                            phone = PROTOCOL_VERSION,
                            "protocol version mismatch"
                        );
                    }
                    Ok(())
                }
                other => Err(anyhow!("unexpected response {other:?}")),
            }
        }
        CliCommand::InitConfig => Ok(()),
    }
}

fn init_config(path: Option<&std::path::Path>, cfg: &AppConfig) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            config::save_config_to(cfg, path)
                .with_context(|| format!("writing config to {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => {
            config::save_config(cfg).context("writing config")?;
            println!("wrote {}", config::config_file_path()?.display());
        }
    }
    Ok(())
}

/// Plays a watch running the companion app.
fn simulated_watch(_device: DeviceId, payload: &[Value]) -> Vec<Vec<Value>> {
    let reply = match decode_command(payload) {
        Ok(Command::Ping { token }) => Response::Pong(Pong { token }),
        Ok(Command::RequestDeviceInfo) => Response::DeviceInfo(DeviceInfo {
            protocol_version: PROTOCOL_VERSION,
            app_version: "1.4.0".to_string(),
            screen_width: 260,
            screen_height: 260,
        }),
        Ok(_) | Err(_) => return Vec::new(),
    };
    vec![encode_response(&reply)]
}
