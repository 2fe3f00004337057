//! Pilot owner loop
//!
//! Every piece of mutable state (connection manager, decoder, scheduler,
//! vehicle) is owned by one task that drains a single event queue. Transport
//! callbacks, timer expiries, provisioning completions and vehicle link
//! changes all arrive as [`PilotEvent`]s on that queue.

use crate::command::{timer_channel_sink, ActuationScheduler, AxisExpiry};
use crate::config::PilotConfig;
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::provisioning::{Credential, CredentialProvisioner, ProvisioningError};
use crate::transport::{channel_sink, PubSubTransport, TransportEvent};
use crate::vehicle::{link_channel_sink, Vehicle, VehicleLinkState};
use anyhow::{anyhow, Result};
use pilot_shared::{Command, CommandDecoder, CommandKind, ConnectionStatus, Decoded};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Requests made by the local operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Connect,
    Disconnect,
    ToggleTakeOffLand,
    Emergency,
    Shutdown,
}

/// Everything the owner loop reacts to
#[derive(Debug)]
pub enum PilotEvent {
    Transport(TransportEvent),
    AxisExpired(AxisExpiry),
    Provisioned(Result<Credential, ProvisioningError>),
    VehicleLink(VehicleLinkState),
    Control(Control),
}

impl From<TransportEvent> for PilotEvent {
    fn from(event: TransportEvent) -> Self {
        PilotEvent::Transport(event)
    }
}

impl From<AxisExpiry> for PilotEvent {
    fn from(expiry: AxisExpiry) -> Self {
        PilotEvent::AxisExpired(expiry)
    }
}

impl From<VehicleLinkState> for PilotEvent {
    fn from(state: VehicleLinkState) -> Self {
        PilotEvent::VehicleLink(state)
    }
}

impl From<Control> for PilotEvent {
    fn from(control: Control) -> Self {
        PilotEvent::Control(control)
    }
}

/// What an operator display shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PilotView {
    pub status: ConnectionStatus,
    /// Text of the last command received, recognized or not
    pub last_command: Option<String>,
}

/// Cloneable handle for posting operator requests to the loop
#[derive(Clone)]
pub struct PilotHandle {
    tx: mpsc::UnboundedSender<PilotEvent>,
}

impl PilotHandle {
    pub fn send(&self, control: Control) -> Result<()> {
        self.tx
            .send(control.into())
            .map_err(|_| anyhow!("pilot loop has stopped"))
    }

    pub fn connect(&self) -> Result<()> {
        self.send(Control::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Control::Disconnect)
    }

    pub fn toggle_take_off_land(&self) -> Result<()> {
        self.send(Control::ToggleTakeOffLand)
    }

    pub fn emergency(&self) -> Result<()> {
        self.send(Control::Emergency)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Control::Shutdown)
    }
}

/// Owns the session, the decoder and the scheduler
pub struct Pilot<V: Vehicle> {
    tx: mpsc::UnboundedSender<PilotEvent>,
    rx: mpsc::UnboundedReceiver<PilotEvent>,
    provisioner: Arc<CredentialProvisioner>,
    connection: ConnectionManager,
    decoder: CommandDecoder,
    scheduler: ActuationScheduler<V>,
    view: Arc<watch::Sender<PilotView>>,
    /// A connect is wanted once the credential is ready
    pending_connect: bool,
    /// A provisioning task is in flight
    provisioning: bool,
    running: bool,
}

impl<V: Vehicle> Pilot<V> {
    pub fn new(
        config: &PilotConfig,
        provisioner: Arc<CredentialProvisioner>,
        transport: Arc<dyn PubSubTransport>,
        mut vehicle: V,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        vehicle.set_link_listener(link_channel_sink(tx.clone()));
        let scheduler = ActuationScheduler::new(vehicle, timer_channel_sink(tx.clone()));

        let (view, _) = watch::channel(PilotView::default());
        let view = Arc::new(view);

        let mut connection = ConnectionManager::new(
            ConnectionConfig::from_iot(&config.iot),
            transport,
            channel_sink(tx.clone()),
        );
        let status_view = view.clone();
        connection.on_status_changed(move |status| {
            info!("[PILOT] Connection status: {}", status);
            status_view.send_modify(|v| v.status = status.clone());
        });

        Self {
            tx,
            rx,
            provisioner,
            connection,
            decoder: CommandDecoder::new(config.actuation.command_duration()),
            scheduler,
            view,
            pending_connect: false,
            provisioning: false,
            running: true,
        }
    }

    pub fn handle(&self) -> PilotHandle {
        PilotHandle {
            tx: self.tx.clone(),
        }
    }

    /// Watch the operator view
    pub fn subscribe_view(&self) -> watch::Receiver<PilotView> {
        self.view.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn scheduler(&self) -> &ActuationScheduler<V> {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Wait for the next queued event
    pub async fn next_event(&mut self) -> Option<PilotEvent> {
        self.rx.recv().await
    }

    /// Drain the queue until shutdown
    pub async fn run(mut self) {
        info!("[PILOT] Running (client {})", self.connection.client_id());

        while self.running {
            match self.next_event().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        info!("[PILOT] Stopped");
    }

    pub fn handle_event(&mut self, event: PilotEvent) {
        match event {
            PilotEvent::Control(control) => self.handle_control(control),
            PilotEvent::Provisioned(result) => self.on_provisioned(result),
            PilotEvent::Transport(event) => {
                if let Some(payload) = self.connection.handle_event(event) {
                    self.on_message(&payload);
                }
            }
            PilotEvent::AxisExpired(expiry) => {
                self.scheduler.on_expired(expiry);
            }
            PilotEvent::VehicleLink(state) => self.on_vehicle_link(state),
        }
    }

    fn handle_control(&mut self, control: Control) {
        debug!("[PILOT] Control: {:?}", control);
        match control {
            Control::Connect => self.request_connect(),
            Control::Disconnect => self.disconnect(),
            Control::ToggleTakeOffLand => self.scheduler.toggle_take_off_land(),
            Control::Emergency => self.scheduler.apply(&Command::new(CommandKind::Emergency)),
            Control::Shutdown => self.stop("shutdown requested"),
        }
    }

    /// Provision on a worker task, then connect back on this loop
    fn request_connect(&mut self) {
        if self.pending_connect {
            debug!("[PILOT] Connect already pending");
            return;
        }
        self.pending_connect = true;

        if self.provisioning {
            return;
        }
        self.provisioning = true;

        let provisioner = self.provisioner.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = provisioner.ensure().await;
            let _ = tx.send(PilotEvent::Provisioned(result));
        });
    }

    fn on_provisioned(&mut self, result: Result<Credential, ProvisioningError>) {
        self.provisioning = false;
        let wanted = std::mem::take(&mut self.pending_connect);

        match result {
            Ok(credential) if wanted => self.connection.connect(&credential),
            Ok(credential) => {
                info!(
                    "[PILOT] Certificate {} ready but connect was cancelled",
                    credential.certificate_id
                );
            }
            Err(e) => {
                error!("[PILOT] Provisioning failed: {}", e);
                if wanted {
                    self.connection.report_failure(e.to_string());
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if std::mem::take(&mut self.pending_connect) {
            info!("[PILOT] Pending connect cancelled");
        }
        self.connection.disconnect();
    }

    fn on_message(&mut self, payload: &[u8]) {
        match self.decoder.decode(payload) {
            Ok(Decoded::Command { phrase, command }) => {
                info!("[DECODER] '{}' -> {:?}", phrase, command.kind);
                self.view.send_modify(|v| v.last_command = Some(phrase));
                self.scheduler.apply(&command);
            }
            Ok(Decoded::Unrecognized { phrase }) => {
                info!("[DECODER] Unrecognized command '{}'", phrase);
                self.view.send_modify(|v| v.last_command = Some(phrase));
            }
            Err(e) => {
                warn!("[DECODER] Dropping payload: {}", e);
            }
        }
    }

    fn on_vehicle_link(&mut self, state: VehicleLinkState) {
        match state {
            VehicleLinkState::Running => info!("[VEHICLE] Link running"),
            VehicleLinkState::Stopped => {
                warn!("[VEHICLE] Link stopped");
                self.stop("vehicle link stopped");
            }
            other => debug!("[VEHICLE] Link {:?}", other),
        }
    }

    fn stop(&mut self, reason: &str) {
        info!("[PILOT] Stopping: {}", reason);
        self.scheduler.shutdown();
        self.pending_connect = false;
        self.connection.disconnect();
        self.running = false;
    }
}
