mod command;
mod config;
mod connection;
mod pilot;
mod provisioning;
mod transport;
mod vehicle;

use anyhow::Result;
use clap::Parser;
use config::PilotConfig;
use pilot::{Pilot, PilotHandle};
use pilot_shared::encode_command;
use provisioning::{CredentialProvisioner, FileKeyStore, SimulatedIssuer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use transport::LoopbackBroker;
use vehicle::SimulatedVehicle;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "drone-pilot")]
#[command(about = "Relays spoken commands from a pub/sub topic to a drone", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the credential keystore
    #[arg(long)]
    keystore_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PilotConfig::from_file(path)?,
        None => PilotConfig::default(),
    };
    if let Some(dir) = args.keystore_path {
        config.provisioning.keystore_path = dir;
    }

    info!("Drone pilot starting: thing {}", config.iot.thing_name);
    info!("  Endpoint: {}", config.iot.endpoint());
    info!("  Topic: {}", config.iot.topic());

    let store = Arc::new(FileKeyStore::new(
        &config.provisioning.keystore_path,
        &config.provisioning.keystore_name,
        &config.provisioning.keystore_password,
    ));
    info!("  Keystore: {}", store.path().display());
    let issuer = Arc::new(SimulatedIssuer::new(&config.iot.region));
    let provisioner = Arc::new(CredentialProvisioner::new(
        config.provisioning.clone(),
        store,
        issuer,
    ));

    let broker = LoopbackBroker::new();
    let transport = Arc::new(broker.transport());
    let vehicle = SimulatedVehicle::new();

    let pilot = Pilot::new(&config, provisioner, transport, vehicle.clone());
    let handle = pilot.handle();

    // Log every view change
    let mut view = pilot.subscribe_view();
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let current = view.borrow_and_update().clone();
            info!(
                "[VIEW] {} | last command: {}",
                current.status,
                current.last_command.as_deref().unwrap_or("-")
            );
        }
    });

    // Console lines become published commands; "!" lines are local controls
    let topic = config.iot.topic();
    let console_handle = handle.clone();
    let console_broker = broker.clone();
    let console_vehicle = vehicle.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(control) = line.strip_prefix('!') {
                        let result = run_console_control(
                            control,
                            &console_handle,
                            &console_broker,
                            &console_vehicle,
                        );
                        if let Err(e) = result {
                            error!("[CONSOLE] {}", e);
                            break;
                        }
                    } else {
                        let delivered = console_broker.publish(&topic, encode_command(line));
                        if delivered == 0 {
                            warn!("[CONSOLE] '{}' published with no subscriber", line);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("[CONSOLE] stdin error: {}", e);
                    break;
                }
            }
        }
    });

    // Ctrl-C neutralizes and stops
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = signal_handle.shutdown();
        }
    });

    vehicle.start();
    handle.connect()?;

    info!("Type a command (e.g. 'take off', 'forward') or !help");
    pilot.run().await;

    info!("Drone pilot exited");
    Ok(())
}

fn run_console_control(
    control: &str,
    handle: &PilotHandle,
    broker: &LoopbackBroker,
    vehicle: &SimulatedVehicle,
) -> Result<()> {
    match control.trim() {
        "connect" => handle.connect(),
        "disconnect" => handle.disconnect(),
        "toggle" => handle.toggle_take_off_land(),
        "emergency" => handle.emergency(),
        "quit" => handle.shutdown(),
        "drop" => {
            broker.interrupt("link dropped from console");
            Ok(())
        }
        "restore" => {
            broker.restore();
            Ok(())
        }
        "sever" => {
            broker.sever("session severed from console");
            Ok(())
        }
        "stop-vehicle" => {
            vehicle.stop();
            Ok(())
        }
        other => {
            if other != "help" {
                warn!("[CONSOLE] Unknown control '{}'", other);
            }
            info!(
                "[CONSOLE] Controls: !connect !disconnect !toggle !emergency !quit \
                 !drop !restore !sever !stop-vehicle"
            );
            Ok(())
        }
    }
}
