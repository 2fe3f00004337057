//! JSON payload codec for the command channel
//!
//! Every message on the command topic is a UTF-8 JSON object:
//! ```text
//! { "command": "<spoken phrase>", ...ignored fields }
//! ```
//!
//! There is no envelope versioning; the vocabulary table is the contract.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::command::{self, Command};
use crate::defaults;

/// Field carrying the spoken phrase
pub const COMMAND_FIELD: &str = "command";

/// Errors that can occur while decoding a payload
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Payload has no string \"command\" field")]
    MissingCommand,
}

/// Outcome of decoding a well-formed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Phrase found in the vocabulary
    Command { phrase: String, command: Command },
    /// Well-formed payload whose phrase is not in the vocabulary
    Unrecognized { phrase: String },
}

impl Decoded {
    /// The phrase as it arrived
    pub fn phrase(&self) -> &str {
        match self {
            Decoded::Command { phrase, .. } | Decoded::Unrecognized { phrase } => phrase,
        }
    }

    pub fn command(&self) -> Option<&Command> {
        match self {
            Decoded::Command { command, .. } => Some(command),
            Decoded::Unrecognized { .. } => None,
        }
    }
}

/// Turns raw payloads into commands with a fixed hold duration
#[derive(Debug, Clone, Copy)]
pub struct CommandDecoder {
    duration: Duration,
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new(Duration::from_millis(defaults::COMMAND_DURATION_MS))
    }
}

impl CommandDecoder {
    /// Create a decoder stamping `duration` onto every command
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Decode a raw payload
    ///
    /// Malformed payloads are errors; an unknown phrase is not, it decodes
    /// to [`Decoded::Unrecognized`] so the caller can log and drop it.
    pub fn decode(&self, raw: &[u8]) -> Result<Decoded, DecodeError> {
        let text = std::str::from_utf8(raw)?;
        let value: Value = serde_json::from_str(text)?;

        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let phrase = object
            .get(COMMAND_FIELD)
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingCommand)?
            .to_string();

        Ok(match command::lookup(&phrase) {
            Some(kind) => Decoded::Command {
                command: Command::new(kind).with_duration(self.duration),
                phrase,
            },
            None => Decoded::Unrecognized { phrase },
        })
    }
}

#[derive(Serialize)]
struct CommandPayload<'a> {
    command: &'a str,
}

/// Build the payload a publisher sends for a spoken phrase
pub fn encode_command(phrase: &str) -> Bytes {
    let encoded = serde_json::to_vec(&CommandPayload { command: phrase }).unwrap_or_default();
    Bytes::from(encoded)
}
