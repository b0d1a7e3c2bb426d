//! Typed input/control commands and their canonical text form.
//!
//! ```text
//! NAME                 e.g. DISCONNECT
//! NAME:p1,p2,...       e.g. MOUSE_MOVE:100,250
//! ```
//!
//! Parameters are decimal integers; names and parameters never contain
//! `:` or `,`. A trailing colon with no parameters (`DISCONNECT:`) is
//! accepted on input, but [`Command`]'s `Display` never emits one.

use std::fmt;
use std::str::FromStr;

use crate::error::RassistError;

// ── Names ────────────────────────────────────────────────────────

pub const MOUSE_MOVE: &str = "MOUSE_MOVE";
pub const MOUSE_CLICK: &str = "MOUSE_CLICK";
pub const MOUSE_PRESS: &str = "MOUSE_PRESS";
pub const MOUSE_RELEASE: &str = "MOUSE_RELEASE";
pub const MOUSE_WHEEL: &str = "MOUSE_WHEEL";
pub const KEY_PRESS: &str = "KEY_PRESS";
pub const KEY_RELEASE: &str = "KEY_RELEASE";
pub const SET_QUALITY: &str = "SET_QUALITY";
pub const SET_FPS: &str = "SET_FPS";
pub const PING: &str = "PING";
pub const DISCONNECT: &str = "DISCONNECT";

// ── Command ──────────────────────────────────────────────────────

/// One input or control instruction sent viewer → agent.
///
/// `button` and `key_code` are opaque to the protocol; see
/// [`MouseButton`] for the mapping the bundled injector uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Move the pointer to `(x, y)` in output-frame coordinates.
    MouseMove { x: u32, y: u32 },
    /// Press and immediately release `button`.
    MouseClick { button: u32 },
    MousePress { button: u32 },
    MouseRelease { button: u32 },
    /// Scroll by `delta` notches (positive = away from the user).
    MouseWheel { delta: i32 },
    /// Press and immediately release `key_code`.
    KeyPress { key_code: u32 },
    KeyRelease { key_code: u32 },
    /// Set encoder quality, 1..=100.
    SetQuality { percent: u8 },
    /// Set capture cadence, 1..=60 frames per second.
    SetFps { fps: u8 },
    /// Keep-alive; carries no action.
    Ping,
    /// Close the session.
    Disconnect,
}

impl Command {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::MouseMove { .. } => MOUSE_MOVE,
            Command::MouseClick { .. } => MOUSE_CLICK,
            Command::MousePress { .. } => MOUSE_PRESS,
            Command::MouseRelease { .. } => MOUSE_RELEASE,
            Command::MouseWheel { .. } => MOUSE_WHEEL,
            Command::KeyPress { .. } => KEY_PRESS,
            Command::KeyRelease { .. } => KEY_RELEASE,
            Command::SetQuality { .. } => SET_QUALITY,
            Command::SetFps { .. } => SET_FPS,
            Command::Ping => PING,
            Command::Disconnect => DISCONNECT,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match *self {
            Command::MouseMove { x, y } => write!(f, "{name}:{x},{y}"),
            Command::MouseClick { button }
            | Command::MousePress { button }
            | Command::MouseRelease { button } => write!(f, "{name}:{button}"),
            Command::MouseWheel { delta } => write!(f, "{name}:{delta}"),
            Command::KeyPress { key_code } | Command::KeyRelease { key_code } => {
                write!(f, "{name}:{key_code}")
            }
            Command::SetQuality { percent } => write!(f, "{name}:{percent}"),
            Command::SetFps { fps } => write!(f, "{name}:{fps}"),
            Command::Ping | Command::Disconnect => f.write_str(name),
        }
    }
}

impl FromStr for Command {
    type Err = RassistError;

    /// Parse the canonical text form.
    ///
    /// Returns [`RassistError::UnknownCommand`] for a well-formed but
    /// unrecognised name, and [`RassistError::InvalidCommand`] when a known
    /// name carries the wrong parameters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (name, rest) = match text.split_once(':') {
            Some((name, rest)) => (name, rest),
            None => (text, ""),
        };
        if name.is_empty() {
            return Err(RassistError::InvalidCommand(s.to_string()));
        }
        let params: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };
        let args = Params { raw: s, params };

        let cmd = match name {
            MOUSE_MOVE => {
                args.expect(2)?;
                Command::MouseMove {
                    x: args.int(0)?,
                    y: args.int(1)?,
                }
            }
            MOUSE_CLICK => Command::MouseClick {
                button: args.single()?,
            },
            MOUSE_PRESS => Command::MousePress {
                button: args.single()?,
            },
            MOUSE_RELEASE => Command::MouseRelease {
                button: args.single()?,
            },
            MOUSE_WHEEL => Command::MouseWheel {
                delta: args.single()?,
            },
            KEY_PRESS => Command::KeyPress {
                key_code: args.single()?,
            },
            KEY_RELEASE => Command::KeyRelease {
                key_code: args.single()?,
            },
            SET_QUALITY => {
                let percent: u8 = args.single()?;
                if !(1..=100).contains(&percent) {
                    return Err(RassistError::InvalidCommand(s.to_string()));
                }
                Command::SetQuality { percent }
            }
            SET_FPS => {
                let fps: u8 = args.single()?;
                if !(1..=60).contains(&fps) {
                    return Err(RassistError::InvalidCommand(s.to_string()));
                }
                Command::SetFps { fps }
            }
            PING => {
                args.expect(0)?;
                Command::Ping
            }
            DISCONNECT => {
                args.expect(0)?;
                Command::Disconnect
            }
            other => return Err(RassistError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }
}

/// Parameter list of one command under parse.
struct Params<'a> {
    raw: &'a str,
    params: Vec<&'a str>,
}

impl Params<'_> {
    fn invalid(&self) -> RassistError {
        RassistError::InvalidCommand(self.raw.to_string())
    }

    fn expect(&self, count: usize) -> Result<(), RassistError> {
        if self.params.len() == count {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn int<T: FromStr>(&self, index: usize) -> Result<T, RassistError> {
        self.params
            .get(index)
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| self.invalid())
    }

    fn single<T: FromStr>(&self) -> Result<T, RassistError> {
        self.expect(1)?;
        self.int(0)
    }
}

// ── MouseButton ──────────────────────────────────────────────────

/// Stable mouse button mapping used by the bundled injectors.
///
/// Canonical codes are the legacy AWT button masks (`16`, `8`, `4`) that
/// existing viewers send; `1`, `2`, `3` are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Resolve a wire button code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            16 | 1 => Some(MouseButton::Left),
            8 | 2 => Some(MouseButton::Middle),
            4 | 3 => Some(MouseButton::Right),
            _ => None,
        }
    }

    /// Canonical wire code.
    pub const fn code(self) -> u32 {
        match self {
            MouseButton::Left => 16,
            MouseButton::Middle => 8,
            MouseButton::Right => 4,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
