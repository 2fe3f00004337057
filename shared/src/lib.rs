//! Drone Pilot Shared Types
//!
//! This crate provides the command vocabulary, the payload codec and the
//! pub/sub connection state machine shared by the pilot and any publisher
//! that feeds it commands.

pub mod codec;
pub mod command;
pub mod state_machine;

pub use codec::{encode_command, CommandDecoder, DecodeError, Decoded};
pub use command::{Axis, Command, CommandKind};
pub use state_machine::ConnectionStatus;

/// Fixed parameters of the command channel
pub mod defaults {
    /// Duration an axis is held before it returns to neutral
    pub const COMMAND_DURATION_MS: u64 = 1000;

    /// Magnitude (percent) used by the vocabulary's movement phrases
    pub const MOVE_MAGNITUDE: i8 = 50;

    /// Largest magnitude an axis accepts, in either direction
    pub const MAX_MAGNITUDE: i8 = 100;

    /// Keystore alias reused across runs
    pub const CERTIFICATE_ALIAS: &str = "default";

    /// MQTT keep-alive in seconds
    pub const KEEP_ALIVE_SECS: u64 = 10;

    /// Name of the vehicle whose shadow topic carries commands
    pub const THING_NAME: &str = "Drone";

    /// Shadow-update topic for the named vehicle
    pub fn command_topic(thing_name: &str) -> String {
        format!("$aws/things/{}/shadow/update", thing_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_topic() {
        assert_eq!(
            defaults::command_topic(defaults::THING_NAME),
            "$aws/things/Drone/shadow/update"
        );
    }
}
