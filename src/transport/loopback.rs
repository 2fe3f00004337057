//! In-process pub/sub broker
//!
//! Stands in for the external MQTT service: clients connect with a
//! credential, subscribe to exact topic names and receive every payload
//! published on them. Delivery is at-most-once; a message published while a
//! client is not subscribed is simply lost.

use crate::provisioning::Credential;
use crate::transport::traits::{
    ConnectOptions, PubSubTransport, QoS, TransportEvent, TransportSink, TransportStatus,
};
use anyhow::{anyhow, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

struct Session {
    client_id: String,
    sink: TransportSink,
    subscriptions: HashSet<String>,
    connected: bool,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<u64, Session>,
}

/// Shared broker; clone to hand out to publishers and transports
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
    next_key: Arc<AtomicU64>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client transport attached to this broker
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            broker: self.clone(),
            key: self.next_key.fetch_add(1, Ordering::SeqCst),
            reject_connect: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Publish from outside any session, returning how many clients got it
    pub fn publish(&self, topic: &str, payload: Bytes) -> usize {
        let targets: Vec<TransportSink> = self
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| s.connected && s.subscriptions.contains(topic))
            .map(|s| s.sink.clone())
            .collect();

        for sink in &targets {
            sink(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            });
        }
        debug!("[BROKER] {} -> {} subscriber(s)", topic, targets.len());
        targets.len()
    }

    /// Drop every live session into Reconnecting; subscriptions are lost
    pub fn interrupt(&self, reason: &str) {
        self.broadcast_status(TransportStatus::Reconnecting, Some(reason), |session| {
            session.connected = false;
            session.subscriptions.clear();
        });
    }

    /// Bring interrupted sessions back
    pub fn restore(&self) {
        let restorable: Vec<TransportSink> = {
            let mut state = self.state.lock();
            state
                .sessions
                .values_mut()
                .filter(|s| !s.connected)
                .map(|s| {
                    s.connected = true;
                    s.sink.clone()
                })
                .collect()
        };
        for sink in restorable {
            sink(TransportEvent::Status {
                status: TransportStatus::Connected,
                error: None,
            });
        }
    }

    /// Re-send a status to every session without changing broker state
    pub fn redeliver(&self, status: TransportStatus) {
        self.broadcast_status(status, None, |_| {});
    }

    /// Terminate every session
    pub fn sever(&self, reason: &str) {
        let sinks: Vec<TransportSink> = self
            .state
            .lock()
            .sessions
            .drain()
            .map(|(_, s)| s.sink)
            .collect();
        for sink in sinks {
            sink(TransportEvent::Status {
                status: TransportStatus::ConnectionLost,
                error: Some(reason.to_string()),
            });
        }
    }

    /// Client ids of every registered session
    pub fn client_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .values()
            .map(|s| s.client_id.clone())
            .collect()
    }

    fn broadcast_status(
        &self,
        status: TransportStatus,
        reason: Option<&str>,
        mut update: impl FnMut(&mut Session),
    ) {
        let sinks: Vec<TransportSink> = {
            let mut state = self.state.lock();
            state
                .sessions
                .values_mut()
                .map(|s| {
                    update(s);
                    s.sink.clone()
                })
                .collect()
        };
        for sink in sinks {
            sink(TransportEvent::Status {
                status,
                error: reason.map(str::to_string),
            });
        }
    }
}

/// One client connection to a [`LoopbackBroker`]
pub struct LoopbackTransport {
    broker: LoopbackBroker,
    key: u64,
    reject_connect: AtomicBool,
    subscribe_calls: AtomicUsize,
}

impl LoopbackTransport {
    /// Make the next connect calls fail synchronously
    pub fn set_reject_connect(&self, reject: bool) {
        self.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Number of subscribe requests issued through this transport
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.broker
            .state
            .lock()
            .sessions
            .get(&self.key)
            .is_some_and(|s| s.connected && s.subscriptions.contains(topic))
    }
}

impl PubSubTransport for LoopbackTransport {
    fn connect(
        &self,
        options: &ConnectOptions,
        credential: &Credential,
        sink: TransportSink,
    ) -> Result<()> {
        if self.reject_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused by {}", options.endpoint));
        }
        if credential.certificate_pem.is_empty() || credential.private_key.is_empty() {
            return Err(anyhow!("client certificate or key is empty"));
        }

        debug!(
            "[BROKER] {} connecting to {} (keep-alive {:?})",
            options.client_id, options.endpoint, options.keep_alive
        );

        self.broker.state.lock().sessions.insert(
            self.key,
            Session {
                client_id: options.client_id.clone(),
                sink: sink.clone(),
                subscriptions: HashSet::new(),
                connected: true,
            },
        );

        sink(TransportEvent::Status {
            status: TransportStatus::Connecting,
            error: None,
        });
        sink(TransportEvent::Status {
            status: TransportStatus::Connected,
            error: None,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.broker.state.lock();
        let session = state
            .sessions
            .get_mut(&self.key)
            .filter(|s| s.connected)
            .ok_or_else(|| anyhow!("cannot subscribe to {}: not connected", topic))?;
        session.subscriptions.insert(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes, _qos: QoS) -> Result<()> {
        let connected = self
            .broker
            .state
            .lock()
            .sessions
            .get(&self.key)
            .is_some_and(|s| s.connected);
        if !connected {
            return Err(anyhow!("cannot publish to {}: not connected", topic));
        }
        self.broker.publish(topic, payload);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.broker.state.lock().sessions.remove(&self.key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::traits::channel_sink;
    use tokio::sync::mpsc;

    fn credential() -> Credential {
        Credential {
            certificate_id: "c1".into(),
            certificate_arn: "arn:c1".into(),
            certificate_pem: b"pem".to_vec(),
            private_key: b"key".to_vec(),
        }
    }

    fn options() -> ConnectOptions {
        ConnectOptions {
            client_id: "client-1".into(),
            endpoint: "local".into(),
            keep_alive: std::time::Duration::from_secs(10),
        }
    }

    fn statuses(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportStatus> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::Status { status, .. } = event {
                out.push(status);
            }
        }
        out
    }

    #[test]
    fn test_connect_reports_statuses() {
        let broker = LoopbackBroker::new();
        let transport = broker.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.connect(&options(), &credential(), channel_sink(tx)).unwrap();

        assert_eq!(
            statuses(&mut rx),
            vec![TransportStatus::Connecting, TransportStatus::Connected]
        );
        assert_eq!(broker.client_ids(), vec!["client-1".to_string()]);
    }

    #[test]
    fn test_rejects_empty_credential() {
        let transport = LoopbackBroker::new().transport();
        let (tx, _rx) = mpsc::unbounded_channel::<TransportEvent>();
        let mut bad = credential();
        bad.private_key.clear();

        assert!(transport.connect(&options(), &bad, channel_sink(tx)).is_err());
    }

    #[test]
    fn test_publish_reaches_subscribers_only() {
        let broker = LoopbackBroker::new();
        let transport = broker.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(&options(), &credential(), channel_sink(tx)).unwrap();
        statuses(&mut rx);

        // Not yet subscribed: lost
        assert_eq!(broker.publish("cmd", Bytes::from_static(b"a")), 0);

        transport.subscribe("cmd", QoS::AtMostOnce).unwrap();
        assert!(transport.is_subscribed("cmd"));
        assert_eq!(broker.publish("cmd", Bytes::from_static(b"b")), 1);
        assert_eq!(broker.publish("other", Bytes::from_static(b"c")), 0);

        match rx.try_recv().unwrap() {
            TransportEvent::Message { topic, payload } => {
                assert_eq!(topic, "cmd");
                assert_eq!(&payload[..], b"b");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let transport = LoopbackBroker::new().transport();
        assert!(transport.subscribe("cmd", QoS::AtMostOnce).is_err());
        assert_eq!(transport.subscribe_calls(), 1);
    }

    #[test]
    fn test_interrupt_and_restore() {
        let broker = LoopbackBroker::new();
        let transport = broker.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(&options(), &credential(), channel_sink(tx)).unwrap();
        transport.subscribe("cmd", QoS::AtMostOnce).unwrap();
        statuses(&mut rx);

        broker.interrupt("keep-alive timeout");
        assert!(!transport.is_subscribed("cmd"));
        assert!(transport.publish("cmd", Bytes::new(), QoS::AtMostOnce).is_err());

        broker.restore();
        assert_eq!(
            statuses(&mut rx),
            vec![TransportStatus::Reconnecting, TransportStatus::Connected]
        );
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let broker = LoopbackBroker::new();
        let transport = broker.transport();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(&options(), &credential(), channel_sink(tx)).unwrap();
        transport.subscribe("cmd", QoS::AtMostOnce).unwrap();
        statuses(&mut rx);

        transport.disconnect().unwrap();
        assert_eq!(broker.publish("cmd", Bytes::from_static(b"x")), 0);
        broker.sever("gone");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rejected_connect() {
        let transport = LoopbackBroker::new().transport();
        transport.set_reject_connect(true);
        let (tx, mut rx) = mpsc::unbounded_channel::<TransportEvent>();

        assert!(transport.connect(&options(), &credential(), channel_sink(tx)).is_err());
        assert!(rx.try_recv().is_err());
    }
}
