//! Input events and key bindings exchanged with the display service.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{argument_type, ArgumentKind, BrailleDots, Command};

/// An input event from a braille display.
///
/// Events are created by the display service and delivered read-only to the
/// client. The meaning of `argument` depends on the command's
/// [`ArgumentKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    command: Command,
    argument: i32,
    event_time: i64,
}

impl InputEvent {
    /// Create an event. `event_time` is in milliseconds since the epoch.
    pub fn new(command: Command, argument: i32, event_time: i64) -> Self {
        Self {
            command,
            argument,
            event_time,
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    /// The raw argument; see [`InputEvent::dots`] and [`InputEvent::position`].
    pub fn argument(&self) -> i32 {
        self.argument
    }

    /// Event time in milliseconds since the epoch.
    pub fn event_time_millis(&self) -> i64 {
        self.event_time
    }

    /// Event time as a UTC timestamp, if representable.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.event_time)
    }

    pub fn argument_kind(&self) -> ArgumentKind {
        argument_type(self.command)
    }

    /// Pressed dots, for commands with a dots argument.
    pub fn dots(&self) -> Option<BrailleDots> {
        match self.argument_kind() {
            ArgumentKind::Dots => Some(BrailleDots::from_bits(self.argument)),
            _ => None,
        }
    }

    /// Zero-based cell position, for commands with a position argument.
    ///
    /// The value is not checked against the display size.
    pub fn position(&self) -> Option<usize> {
        match self.argument_kind() {
            ArgumentKind::Position => usize::try_from(self.argument).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputEvent {{command={}", self.command)?;
        match self.argument_kind() {
            ArgumentKind::Dots => write!(f, ", {}", BrailleDots::from_bits(self.argument))?,
            ArgumentKind::Position => write!(f, ", position={}", self.argument)?,
            ArgumentKind::None => {}
        }
        match self.event_time() {
            Some(time) => write!(f, ", time={}}}", time.format("%H:%M:%S%.3f")),
            None => write!(f, ", time={}ms}}", self.event_time),
        }
    }
}

/// A key combination that produces a command on a particular display.
///
/// `key_names` are the display-specific names of keys that must be pressed
/// together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBinding {
    command: Option<Command>,
    key_names: Vec<String>,
}

impl KeyBinding {
    pub fn new(command: Command, key_names: Vec<String>) -> Self {
        Self {
            command: Some(command),
            key_names,
        }
    }

    /// The bound command, or [`Command::NONE`] if unset.
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::NONE)
    }

    pub fn key_names(&self) -> &[String] {
        &self.key_names
    }

    pub fn set_command(&mut self, command: Command) -> &mut Self {
        self.command = Some(command);
        self
    }

    pub fn set_key_names<I, S>(&mut self, key_names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_names = key_names.into_iter().map(Into::into).collect();
        self
    }
}
