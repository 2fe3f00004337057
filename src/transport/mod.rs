//! Pub/sub transport
//!
//! The broker client is an external collaborator; this module defines the
//! seam it plugs into and an in-process broker used by the simulator and
//! the tests.

pub mod loopback;
pub mod traits;

pub use loopback::{LoopbackBroker, LoopbackTransport};
pub use traits::{
    channel_sink, ConnectOptions, PubSubTransport, QoS, TransportEvent, TransportSink,
    TransportStatus,
};
