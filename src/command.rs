//! Braille input commands.
//!
//! A [`Command`] is the integer code a braille display service attaches to
//! every input event. Each command carries at most one argument, whose kind
//! is fixed per command by a compiled-in table:
//!
//! - [`ArgumentKind::None`] - no argument
//! - [`ArgumentKind::Dots`] - a dot-pattern bitmask (see [`BrailleDots`])
//! - [`ArgumentKind::Position`] - a zero-based cell offset from the leftmost cell
//!
//! Command names are stable and round-trip through [`command_to_string`] and
//! [`string_to_command`].

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Placeholder rendered for commands without a registered name.
pub const UNKNOWN_COMMAND_NAME: &str = "(unknown)";

/// Integer code identifying a logical input action.
///
/// Codes are open-ended on the wire, so this is a newtype rather than an
/// enum; the known codes are associated constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(i32);

impl Command {
    /// Sentinel meaning "no command". Distinct from every real command.
    pub const NONE: Command = Command(-1);

    // Line navigation.
    pub const NAV_LINE_PREVIOUS: Command = Command(1);
    pub const NAV_LINE_NEXT: Command = Command(2);
    // Item navigation.
    pub const NAV_ITEM_PREVIOUS: Command = Command(3);
    pub const NAV_ITEM_NEXT: Command = Command(4);
    // Panning within a line.
    pub const NAV_PAN_LEFT: Command = Command(5);
    pub const NAV_PAN_RIGHT: Command = Command(6);
    pub const NAV_TOP: Command = Command(7);
    pub const NAV_BOTTOM: Command = Command(8);

    /// Activate the item that has focus.
    pub const ACTIVATE_CURRENT: Command = Command(20);

    pub const SCROLL_BACKWARD: Command = Command(30);
    pub const SCROLL_FORWARD: Command = Command(31);

    pub const SELECTION_START: Command = Command(40);
    pub const SELECTION_END: Command = Command(41);
    pub const SELECTION_SELECT_ALL: Command = Command(42);
    pub const SELECTION_CUT: Command = Command(43);
    pub const SELECTION_COPY: Command = Command(44);
    pub const SELECTION_PASTE: Command = Command(45);

    /// A routing key was pressed. Argument: cell position.
    pub const ROUTE: Command = Command(50);

    /// A braille key combination was typed. Argument: dot bitmask.
    pub const BRAILLE_KEY: Command = Command(60);

    pub const KEY_ENTER: Command = Command(70);
    pub const KEY_DEL: Command = Command(71);
    pub const KEY_FORWARD_DEL: Command = Command(72);

    pub const GLOBAL_BACK: Command = Command(90);
    pub const GLOBAL_HOME: Command = Command(91);
    pub const GLOBAL_RECENTS: Command = Command(92);
    pub const GLOBAL_NOTIFICATIONS: Command = Command(93);

    pub const HELP: Command = Command(100);

    /// Wrap a raw wire code.
    pub const fn from_code(code: i32) -> Self {
        Command(code)
    }

    /// The raw wire code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// The kind of argument events with this command carry.
    pub fn argument_kind(self) -> ArgumentKind {
        argument_type(self)
    }

    /// Symbolic name, or [`UNKNOWN_COMMAND_NAME`].
    pub fn name(self) -> &'static str {
        command_to_string(self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Argument kind attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentKind {
    /// The argument is unused.
    None,
    /// The argument is a dot-pattern bitmask.
    Dots,
    /// The argument is a zero-based display cell position.
    Position,
}

/// Every known command with its name and argument kind.
const COMMANDS: &[(Command, &str, ArgumentKind)] = &[
    (Command::NAV_LINE_PREVIOUS, "CMD_NAV_LINE_PREVIOUS", ArgumentKind::None),
    (Command::NAV_LINE_NEXT, "CMD_NAV_LINE_NEXT", ArgumentKind::None),
    (Command::NAV_ITEM_PREVIOUS, "CMD_NAV_ITEM_PREVIOUS", ArgumentKind::None),
    (Command::NAV_ITEM_NEXT, "CMD_NAV_ITEM_NEXT", ArgumentKind::None),
    (Command::NAV_PAN_LEFT, "CMD_NAV_PAN_LEFT", ArgumentKind::None),
    (Command::NAV_PAN_RIGHT, "CMD_NAV_PAN_RIGHT", ArgumentKind::None),
    (Command::NAV_TOP, "CMD_NAV_TOP", ArgumentKind::None),
    (Command::NAV_BOTTOM, "CMD_NAV_BOTTOM", ArgumentKind::None),
    (Command::ACTIVATE_CURRENT, "CMD_ACTIVATE_CURRENT", ArgumentKind::None),
    (Command::SCROLL_BACKWARD, "CMD_SCROLL_BACKWARD", ArgumentKind::None),
    (Command::SCROLL_FORWARD, "CMD_SCROLL_FORWARD", ArgumentKind::None),
    (Command::SELECTION_START, "CMD_SELECTION_START", ArgumentKind::None),
    (Command::SELECTION_END, "CMD_SELECTION_END", ArgumentKind::None),
    (Command::SELECTION_SELECT_ALL, "CMD_SELECTION_SELECT_ALL", ArgumentKind::None),
    (Command::SELECTION_CUT, "CMD_SELECTION_CUT", ArgumentKind::None),
    (Command::SELECTION_COPY, "CMD_SELECTION_COPY", ArgumentKind::None),
    (Command::SELECTION_PASTE, "CMD_SELECTION_PASTE", ArgumentKind::None),
    (Command::ROUTE, "CMD_ROUTE", ArgumentKind::Position),
    (Command::BRAILLE_KEY, "CMD_BRAILLE_KEY", ArgumentKind::Dots),
    (Command::KEY_ENTER, "CMD_KEY_ENTER", ArgumentKind::None),
    (Command::KEY_DEL, "CMD_KEY_DEL", ArgumentKind::None),
    (Command::KEY_FORWARD_DEL, "CMD_KEY_FORWARD_DEL", ArgumentKind::None),
    (Command::GLOBAL_BACK, "CMD_GLOBAL_BACK", ArgumentKind::None),
    (Command::GLOBAL_HOME, "CMD_GLOBAL_HOME", ArgumentKind::None),
    (Command::GLOBAL_RECENTS, "CMD_GLOBAL_RECENTS", ArgumentKind::None),
    (Command::GLOBAL_NOTIFICATIONS, "CMD_GLOBAL_NOTIFICATIONS", ArgumentKind::None),
    (Command::HELP, "CMD_HELP", ArgumentKind::None),
];

static NAMES_BY_COMMAND: LazyLock<HashMap<Command, &'static str>> =
    LazyLock::new(|| COMMANDS.iter().map(|&(cmd, name, _)| (cmd, name)).collect());

static COMMANDS_BY_NAME: LazyLock<HashMap<&'static str, Command>> =
    LazyLock::new(|| COMMANDS.iter().map(|&(cmd, name, _)| (name, cmd)).collect());

static ARGUMENT_KINDS: LazyLock<HashMap<Command, ArgumentKind>> = LazyLock::new(|| {
    COMMANDS
        .iter()
        .filter(|(_, _, kind)| *kind != ArgumentKind::None)
        .map(|&(cmd, _, kind)| (cmd, kind))
        .collect()
});

/// All commands with a registered name, in code order.
pub fn known_commands() -> impl Iterator<Item = Command> {
    COMMANDS.iter().map(|&(cmd, _, _)| cmd)
}

/// Argument kind for `command`. Anything not explicitly classified has no
/// argument.
pub fn argument_type(command: Command) -> ArgumentKind {
    ARGUMENT_KINDS
        .get(&command)
        .copied()
        .unwrap_or(ArgumentKind::None)
}

/// Symbolic name of `command`, or [`UNKNOWN_COMMAND_NAME`].
pub fn command_to_string(command: Command) -> &'static str {
    NAMES_BY_COMMAND
        .get(&command)
        .copied()
        .unwrap_or(UNKNOWN_COMMAND_NAME)
}

/// Command registered under `name`, or [`Command::NONE`].
pub fn string_to_command(name: &str) -> Command {
    COMMANDS_BY_NAME.get(name).copied().unwrap_or(Command::NONE)
}

/// Pressed braille dots, decoded from a [`ArgumentKind::Dots`] argument.
///
/// Bit `n - 1` of the mask is dot `n`, so bit 0 is dot 1 and bit 7 is dot 8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BrailleDots(u8);

impl BrailleDots {
    /// Interpret the low 8 bits of an event argument.
    pub const fn from_bits(bits: i32) -> Self {
        BrailleDots((bits & 0xff) as u8)
    }

    /// Build a pattern from dot numbers in `1..=8`. Out-of-range dots are
    /// ignored.
    pub fn from_dots(dots: &[u8]) -> Self {
        let bits = dots
            .iter()
            .filter(|dot| (1..=8).contains(*dot))
            .fold(0u8, |acc, dot| acc | 1 << (dot - 1));
        BrailleDots(bits)
    }

    /// The raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether dot `dot` (1-based) is pressed.
    pub fn contains(self, dot: u8) -> bool {
        (1..=8).contains(&dot) && self.0 & (1 << (dot - 1)) != 0
    }

    /// Pressed dot numbers in ascending order.
    pub fn dots(self) -> Vec<u8> {
        (1..=8).filter(|dot| self.contains(*dot)).collect()
    }
}

impl fmt::Display for BrailleDots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dots(")?;
        for dot in self.dots() {
            write!(f, "{}", dot)?;
        }
        write!(f, ")")
    }
}
