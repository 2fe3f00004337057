//! Connection manager for the pub/sub command session

use crate::config::IotConfig;
use crate::provisioning::Credential;
use crate::transport::{
    ConnectOptions, PubSubTransport, QoS, TransportEvent, TransportSink, TransportStatus,
};
use bytes::Bytes;
use pilot_shared::state_machine::ConnectionStateMachine;
use pilot_shared::ConnectionStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// MQTT client id, unique per connecting process
    pub client_id: String,
    /// Broker host name
    pub endpoint: String,
    /// Topic carrying commands for this vehicle
    pub topic: String,
    pub keep_alive: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_iot(&IotConfig::default())
    }
}

impl ConnectionConfig {
    /// Derive session settings, generating a client id when none is configured
    pub fn from_iot(iot: &IotConfig) -> Self {
        Self {
            client_id: iot
                .client_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            endpoint: iot.endpoint(),
            topic: iot.topic(),
            keep_alive: iot.keep_alive(),
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            client_id: self.client_id.clone(),
            endpoint: self.endpoint.clone(),
            keep_alive: self.keep_alive,
        }
    }
}

/// Callback invoked whenever the connection status changes
pub type StatusObserver = Box<dyn FnMut(&ConnectionStatus) + Send>;

/// Owns the pub/sub session lifecycle
///
/// Lives on the owner loop: every method takes `&mut self` and transport
/// callbacks reach it only after being queued onto that loop.
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<dyn PubSubTransport>,
    /// Where the transport reports back to
    sink: TransportSink,
    fsm: ConnectionStateMachine,
    /// False after an explicit disconnect; late callbacks are dropped
    session_open: bool,
    subscribe_requests: usize,
    observers: Vec<StatusObserver>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn PubSubTransport>,
        sink: TransportSink,
    ) -> Self {
        Self {
            config,
            transport,
            sink,
            fsm: ConnectionStateMachine::new(),
            session_open: false,
            subscribe_requests: 0,
            observers: Vec::new(),
        }
    }

    /// Register a status observer
    pub fn on_status_changed(&mut self, observer: impl FnMut(&ConnectionStatus) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Get the current status
    pub fn status(&self) -> &ConnectionStatus {
        self.fsm.status()
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Number of subscription requests issued so far
    pub fn subscribe_requests(&self) -> usize {
        self.subscribe_requests
    }

    /// Start connecting; the outcome arrives as status events
    ///
    /// A failure of the call itself becomes an Error status.
    pub fn connect(&mut self, credential: &Credential) {
        let reusable = matches!(
            self.status(),
            ConnectionStatus::Idle | ConnectionStatus::Disconnected | ConnectionStatus::Error(_)
        );
        if self.session_open && !reusable {
            warn!("[IOT] Connect ignored, session already {}", self.status());
            return;
        }

        info!(
            "[IOT] Connecting to {} via {} (client {})",
            self.config.endpoint,
            self.transport.name(),
            self.config.client_id
        );

        self.session_open = true;
        let options = self.config.connect_options();
        if let Err(e) = self.transport.connect(&options, credential, self.sink.clone()) {
            error!("[IOT] Connection error: {}", e);
            self.session_open = false;
            self.set_status(ConnectionStatus::Error(e.to_string()));
        }
    }

    /// Close the session; safe to call in any state
    pub fn disconnect(&mut self) {
        self.session_open = false;
        if let Err(e) = self.transport.disconnect() {
            warn!("[IOT] Disconnect error: {}", e);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Surface a failure that kept the session from being attempted
    pub fn report_failure(&mut self, message: impl Into<String>) {
        self.set_status(ConnectionStatus::Error(message.into()));
    }

    /// Process a transport callback
    ///
    /// Returns the payload of an inbound message on the command topic.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<Bytes> {
        match event {
            TransportEvent::Status { status, error } => {
                self.handle_status(status, error);
                None
            }
            TransportEvent::Message { topic, payload } => {
                if !self.session_open {
                    debug!("[IOT] Dropping message on {} after disconnect", topic);
                    return None;
                }
                if topic != self.config.topic {
                    debug!("[IOT] Ignoring message on unexpected topic {}", topic);
                    return None;
                }
                Some(payload)
            }
        }
    }

    fn handle_status(&mut self, status: TransportStatus, error: Option<String>) {
        if !self.session_open {
            debug!("[IOT] Ignoring status {} after disconnect", status);
            return;
        }
        debug!("[IOT] Status = {}", status);

        if let Some(error) = error {
            error!("[IOT] Connection error: {}", error);
        }

        let next = match status {
            TransportStatus::Connecting => ConnectionStatus::Connecting,
            TransportStatus::Connected => ConnectionStatus::Connected,
            TransportStatus::Reconnecting => ConnectionStatus::Reconnecting,
            TransportStatus::ConnectionLost => ConnectionStatus::Disconnected,
        };

        let transition = self.fsm.apply(next);
        if !transition.expected {
            warn!(
                "[IOT] Unexpected transition {:?} -> {:?}",
                transition.from, transition.to
            );
        }
        if transition.entered_connected() {
            self.subscribe();
        }
        if transition.changed() {
            self.notify();
        }
    }

    fn subscribe(&mut self) {
        let topic = self.config.topic.clone();
        info!("[IOT] Subscribing to {}", topic);

        self.subscribe_requests += 1;
        if let Err(e) = self.transport.subscribe(&topic, QoS::AtMostOnce) {
            error!("[IOT] Subscription error: {}", e);
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.fsm.apply(status).changed() {
            self.notify();
        }
    }

    fn notify(&mut self) {
        let status = self.fsm.status().clone();
        for observer in &mut self.observers {
            observer(&status);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.session_open {
            let _ = self.transport.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{channel_sink, LoopbackBroker, LoopbackTransport};
    use parking_lot::Mutex;
    use pilot_shared::defaults;
    use tokio::sync::mpsc;

    struct Harness {
        broker: LoopbackBroker,
        transport: Arc<LoopbackTransport>,
        manager: ConnectionManager,
        rx: mpsc::UnboundedReceiver<TransportEvent>,
        seen: Arc<Mutex<Vec<ConnectionStatus>>>,
    }

    impl Harness {
        fn new() -> Self {
            let broker = LoopbackBroker::new();
            let transport = Arc::new(broker.transport());
            let (tx, rx) = mpsc::unbounded_channel();
            let config = ConnectionConfig {
                client_id: "test-client".into(),
                ..Default::default()
            };

            let mut manager = ConnectionManager::new(config, transport.clone(), channel_sink(tx));
            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen_clone = seen.clone();
            manager.on_status_changed(move |status| seen_clone.lock().push(status.clone()));

            Self { broker, transport, manager, rx, seen }
        }

        /// Feed queued callbacks to the manager, collecting message payloads
        fn pump(&mut self) -> Vec<Bytes> {
            let mut payloads = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                payloads.extend(self.manager.handle_event(event));
            }
            payloads
        }

        fn seen(&self) -> Vec<ConnectionStatus> {
            self.seen.lock().clone()
        }
    }

    fn credential() -> Credential {
        Credential {
            certificate_id: "c1".into(),
            certificate_arn: "arn:c1".into(),
            certificate_pem: b"pem".to_vec(),
            private_key: b"key".to_vec(),
        }
    }

    #[test]
    fn test_connect_subscribes_once_connected() {
        let mut h = Harness::new();
        assert_eq!(h.manager.status(), &ConnectionStatus::Idle);

        h.manager.connect(&credential());
        // Nothing changes until the callbacks are processed
        assert_eq!(h.manager.status(), &ConnectionStatus::Idle);
        h.pump();

        assert_eq!(h.manager.status(), &ConnectionStatus::Connected);
        assert_eq!(
            h.seen(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
        assert_eq!(h.manager.subscribe_requests(), 1);
        assert!(h.transport.is_subscribed(h.manager.topic()));
    }

    #[test]
    fn test_redelivered_connected_does_not_resubscribe() {
        let mut h = Harness::new();
        h.manager.connect(&credential());
        h.pump();

        h.broker.redeliver(TransportStatus::Connected);
        h.pump();

        assert_eq!(h.manager.subscribe_requests(), 1);
        assert_eq!(h.transport.subscribe_calls(), 1);
        assert_eq!(h.seen().len(), 2);
    }

    #[test]
    fn test_resubscribes_after_reconnect() {
        let mut h = Harness::new();
        h.manager.connect(&credential());
        h.pump();

        h.broker.interrupt("keep-alive timeout");
        h.pump();
        assert_eq!(h.manager.status(), &ConnectionStatus::Reconnecting);

        h.broker.restore();
        h.pump();
        assert_eq!(h.manager.status(), &ConnectionStatus::Connected);
        assert_eq!(h.manager.subscribe_requests(), 2);
        assert!(h.transport.is_subscribed(h.manager.topic()));
    }

    #[test]
    fn test_connect_failure_reported_as_status() {
        let mut h = Harness::new();
        h.transport.set_reject_connect(true);

        h.manager.connect(&credential());

        assert!(h.manager.status().is_error());
        assert_eq!(h.seen().len(), 1);
        assert!(h.seen()[0].to_string().starts_with("Error! connection refused"));
        assert_eq!(h.manager.subscribe_requests(), 0);

        // Retrying by calling connect again works
        h.transport.set_reject_connect(false);
        h.manager.connect(&credential());
        h.pump();
        assert_eq!(h.manager.status(), &ConnectionStatus::Connected);
    }

    #[test]
    fn test_connection_lost_maps_to_disconnected() {
        let mut h = Harness::new();
        h.manager.connect(&credential());
        h.pump();

        h.broker.sever("network unreachable");
        h.pump();
        assert_eq!(h.manager.status(), &ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_disconnect_ignores_late_callbacks() {
        let mut h = Harness::new();
        h.manager.connect(&credential());
        // Callbacks still queued when the user disconnects
        h.manager.disconnect();
        assert_eq!(h.manager.status(), &ConnectionStatus::Disconnected);

        h.pump();
        assert_eq!(h.manager.status(), &ConnectionStatus::Disconnected);
        assert_eq!(h.manager.subscribe_requests(), 0);
        assert_eq!(h.seen(), vec![ConnectionStatus::Disconnected]);
    }

    #[test]
    fn test_messages_filtered_by_topic_and_session() {
        let mut h = Harness::new();
        h.manager.connect(&credential());
        h.pump();

        let topic = h.manager.topic().to_string();
        h.broker.publish(&topic, Bytes::from_static(b"{}"));
        assert_eq!(h.pump(), vec![Bytes::from_static(b"{}")]);

        let stray = TransportEvent::Message {
            topic: "elsewhere".into(),
            payload: Bytes::new(),
        };
        assert!(h.manager.handle_event(stray).is_none());

        h.manager.disconnect();
        let late = TransportEvent::Message {
            topic,
            payload: Bytes::new(),
        };
        assert!(h.manager.handle_event(late).is_none());
    }

    #[test]
    fn test_disconnect_while_idle() {
        let mut h = Harness::new();
        h.manager.disconnect();
        assert_eq!(h.manager.status(), &ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_random_client_id() {
        let a = ConnectionConfig::from_iot(&IotConfig::default());
        let b = ConnectionConfig::from_iot(&IotConfig::default());
        assert_ne!(a.client_id, b.client_id);
        assert_eq!(a.topic, defaults::command_topic("Drone"));
    }
}
