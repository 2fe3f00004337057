//! Pub/sub transport abstraction for pluggable broker backends

use crate::provisioning::Credential;
use anyhow::Result;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Status values reported by the transport's connection callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Connecting,
    Connected,
    Reconnecting,
    ConnectionLost,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportStatus::Connecting => write!(f, "Connecting"),
            TransportStatus::Connected => write!(f, "Connected"),
            TransportStatus::Reconnecting => write!(f, "Reconnecting"),
            TransportStatus::ConnectionLost => write!(f, "ConnectionLost"),
        }
    }
}

/// Delivery guarantee requested for a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
}

/// Callbacks raised by the transport, on its own threads
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Status {
        status: TransportStatus,
        /// Cause reported alongside Reconnecting/ConnectionLost
        error: Option<String>,
    },
    Message {
        topic: String,
        payload: Bytes,
    },
}

/// Receiver for transport callbacks; must only enqueue, never block
pub type TransportSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Build a sink that forwards into an unbounded channel
pub fn channel_sink<E>(tx: mpsc::UnboundedSender<E>) -> TransportSink
where
    E: From<TransportEvent> + Send + 'static,
{
    Arc::new(move |event| {
        // Receiver gone means the owner loop has stopped
        let _ = tx.send(E::from(event));
    })
}

/// Session parameters handed to the transport
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Unique per connecting client
    pub client_id: String,
    pub endpoint: String,
    pub keep_alive: Duration,
}

/// Client side of a topic-addressed pub/sub broker
///
/// Every call only initiates work and returns immediately; outcomes are
/// reported through the sink given to [`PubSubTransport::connect`].
pub trait PubSubTransport: Send + Sync {
    /// Start connecting with `credential`; status changes and messages for
    /// this session go to `sink`
    fn connect(
        &self,
        options: &ConnectOptions,
        credential: &Credential,
        sink: TransportSink,
    ) -> Result<()>;

    /// Request a subscription on `topic` for the current session
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()>;

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()>;

    /// Close the session; no further callbacks are raised for it
    fn disconnect(&self) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
