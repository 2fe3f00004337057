//! Command model and phrase vocabulary
//!
//! A [`Command`] is built per inbound message and consumed immediately by the
//! actuation layer. The vocabulary table is the only contract with the
//! publisher: phrases are matched case-insensitively after trimming and
//! collapsing inner whitespace.

use crate::defaults;
use std::fmt;
use std::time::Duration;

/// Control dimensions accepted by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Pitch,
    Roll,
    Yaw,
    /// Throttle
    Gaz,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Pitch, Axis::Roll, Axis::Yaw, Axis::Gaz];

    /// Pitch and Roll move the vehicle horizontally and need the auxiliary
    /// movement flag raised while non-neutral.
    pub fn is_horizontal(self) -> bool {
        matches!(self, Axis::Pitch | Axis::Roll)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Pitch => write!(f, "pitch"),
            Axis::Roll => write!(f, "roll"),
            Axis::Yaw => write!(f, "yaw"),
            Axis::Gaz => write!(f, "gaz"),
        }
    }
}

/// What a command asks the vehicle to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    TakeOff,
    Land,
    Emergency,
    Flip,
    Picture,
    /// Hold `axis` at `magnitude` percent for the command's duration
    AxisMove { axis: Axis, magnitude: i8 },
}

impl CommandKind {
    /// Build an axis move, clamping the magnitude into [-100, 100]
    pub fn axis_move(axis: Axis, magnitude: i8) -> Self {
        CommandKind::AxisMove {
            axis,
            magnitude: magnitude.clamp(-defaults::MAX_MAGNITUDE, defaults::MAX_MAGNITUDE),
        }
    }
}

/// A decoded command ready for actuation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub duration: Duration,
}

impl Command {
    /// Create a command held for the default duration
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            duration: Duration::from_millis(defaults::COMMAND_DURATION_MS),
        }
    }

    /// Override the hold duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

const UP: CommandKind = CommandKind::AxisMove {
    axis: Axis::Gaz,
    magnitude: defaults::MOVE_MAGNITUDE,
};
const DOWN: CommandKind = CommandKind::AxisMove {
    axis: Axis::Gaz,
    magnitude: -defaults::MOVE_MAGNITUDE,
};

/// Phrase table, already normalized
pub const VOCABULARY: &[(&str, CommandKind)] = &[
    ("take off", CommandKind::TakeOff),
    ("land", CommandKind::Land),
    ("up", UP),
    ("go up", UP),
    ("fly up", UP),
    ("down", DOWN),
    ("go down", DOWN),
    ("fly down", DOWN),
    ("forward", CommandKind::AxisMove { axis: Axis::Pitch, magnitude: defaults::MOVE_MAGNITUDE }),
    ("backward", CommandKind::AxisMove { axis: Axis::Pitch, magnitude: -defaults::MOVE_MAGNITUDE }),
    ("right", CommandKind::AxisMove { axis: Axis::Roll, magnitude: defaults::MOVE_MAGNITUDE }),
    ("left", CommandKind::AxisMove { axis: Axis::Roll, magnitude: -defaults::MOVE_MAGNITUDE }),
    ("spin right", CommandKind::AxisMove { axis: Axis::Yaw, magnitude: defaults::MOVE_MAGNITUDE }),
    ("spin left", CommandKind::AxisMove { axis: Axis::Yaw, magnitude: -defaults::MOVE_MAGNITUDE }),
    ("flip", CommandKind::Flip),
    ("picture", CommandKind::Picture),
    ("take picture", CommandKind::Picture),
    ("emergency", CommandKind::Emergency),
];

/// Lowercase, trim and collapse runs of whitespace
pub fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Look a spoken phrase up in the vocabulary
pub fn lookup(phrase: &str) -> Option<CommandKind> {
    let normalized = normalize(phrase);
    VOCABULARY
        .iter()
        .find(|(entry, _)| *entry == normalized)
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_and_trim_insensitive() {
        assert_eq!(lookup("  Take Off  "), lookup("take off"));
        assert_eq!(lookup("TAKE\tOFF"), Some(CommandKind::TakeOff));
        assert_eq!(lookup(" Spin   LEFT "), lookup("spin left"));
    }

    #[test]
    fn test_every_entry_resolves_to_itself() {
        for (phrase, kind) in VOCABULARY {
            assert_eq!(lookup(phrase), Some(*kind), "phrase {:?}", phrase);
            assert_eq!(lookup(&phrase.to_uppercase()), Some(*kind));
        }
    }

    #[test]
    fn test_synonyms_share_a_kind() {
        assert_eq!(lookup("up"), lookup("fly up"));
        assert_eq!(lookup("go down"), lookup("down"));
        assert_eq!(lookup("picture"), lookup("take picture"));
    }

    #[test]
    fn test_movement_directions() {
        assert_eq!(
            lookup("forward"),
            Some(CommandKind::AxisMove { axis: Axis::Pitch, magnitude: 50 })
        );
        assert_eq!(
            lookup("left"),
            Some(CommandKind::AxisMove { axis: Axis::Roll, magnitude: -50 })
        );
        assert_eq!(
            lookup("spin left"),
            Some(CommandKind::AxisMove { axis: Axis::Yaw, magnitude: -50 })
        );
        assert_eq!(
            lookup("down"),
            Some(CommandKind::AxisMove { axis: Axis::Gaz, magnitude: -50 })
        );
    }

    #[test]
    fn test_unknown_phrase() {
        assert_eq!(lookup("barrel roll"), None);
        assert_eq!(lookup(""), None);
        assert_eq!(lookup("takeoff"), None);
    }

    #[test]
    fn test_axis_move_clamps_magnitude() {
        assert_eq!(
            CommandKind::axis_move(Axis::Yaw, 127),
            CommandKind::AxisMove { axis: Axis::Yaw, magnitude: 100 }
        );
        assert_eq!(
            CommandKind::axis_move(Axis::Gaz, -128),
            CommandKind::AxisMove { axis: Axis::Gaz, magnitude: -100 }
        );
    }

    #[test]
    fn test_default_duration() {
        let cmd = Command::new(CommandKind::Land);
        assert_eq!(cmd.duration, Duration::from_millis(1000));
        let cmd = cmd.with_duration(Duration::from_millis(250));
        assert_eq!(cmd.duration.as_millis(), 250);
    }

    #[test]
    fn test_horizontal_axes() {
        assert!(Axis::Pitch.is_horizontal());
        assert!(Axis::Roll.is_horizontal());
        assert!(!Axis::Yaw.is_horizontal());
        assert!(!Axis::Gaz.is_horizontal());
    }
}
