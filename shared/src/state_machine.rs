//! Pub/sub Connection State Machine
//!
//! Defines the connection statuses shown to observers and which transitions
//! between them are expected. Transitions are driven by the transport's
//! status callback; the table only classifies them.

use std::fmt;

/// Status of the pub/sub session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No connect attempt made yet
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    /// Connect failed or the transport reported an error; not terminal
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionStatus::Error(_))
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "Idle"),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Reconnecting => write!(f, "Reconnecting"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Error(message) => write!(f, "Error! {}", message),
        }
    }
}

/// Check if a transition from one status to another is expected
pub fn is_valid_transition(from: &ConnectionStatus, to: &ConnectionStatus) -> bool {
    use ConnectionStatus::*;

    match (from, to) {
        // Re-delivery of the same status
        (a, b) if a == b => true,

        // Explicit disconnect and failures can happen anywhere
        (_, Disconnected) => true,
        (_, Error(_)) => true,

        // (Re)starting a connect attempt
        (Idle | Disconnected | Error(_), Connecting) => true,

        (Connecting, Connected) => true,
        (Reconnecting, Connected) => true,

        // The transport rebuilds the session on its own
        (Connected, Reconnecting) => true,
        (Error(_), Reconnecting) => true,

        _ => false,
    }
}

/// Tracks the current status and classifies each transition
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current: ConnectionStatus,
}

/// Result of applying a status reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    /// Whether the table expects this transition
    pub expected: bool,
}

impl Transition {
    /// True when this transition moves into Connected from another status
    pub fn entered_connected(&self) -> bool {
        self.to.is_connected() && !self.from.is_connected()
    }

    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current status
    pub fn status(&self) -> &ConnectionStatus {
        &self.current
    }

    /// Move to `to`, reporting where we came from
    ///
    /// The status is always applied; unexpected transitions are only flagged
    /// since the transport is the source of truth.
    pub fn apply(&mut self, to: ConnectionStatus) -> Transition {
        let expected = is_valid_transition(&self.current, &to);
        let from = std::mem::replace(&mut self.current, to.clone());
        Transition { from, to, expected }
    }
}
