//! Console command shell and logging session listener.
//!
//! | Input                      | Effect                                  |
//! |----------------------------|-----------------------------------------|
//! | `MOUSE_MOVE:100,250` etc.  | sent as is                              |
//! | `move X Y`                 | `MOUSE_MOVE` in frame coordinates        |
//! | `point X Y`                | `MOUSE_MOVE` mapped from view coordinates |
//! | `click [left/middle/right]`| `MOUSE_CLICK`                           |
//! | `wheel N`                  | `MOUSE_WHEEL`                           |
//! | `key CODE`                 | `KEY_PRESS` (decimal or `0x` hex VK)    |
//! | `quality N` / `fps N`      | `SET_QUALITY` / `SET_FPS`, sent at once |
//! | `stats`, `help`, `quit`    | local                                   |

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rassist_core::viewer::scale_to_frame;
use rassist_core::{Bitmap, Command, MouseButton, RassistError, SessionListener};
use tokio::sync::Notify;
use tracing::{debug, error, info};

pub const HELP: &str = "\
commands: move X Y | point X Y | click [left|middle|right] | wheel N | key CODE
          quality N | fps N | stats | quit | or any wire command (e.g. KEY_PRESS:65)";

/// What the main loop should do with one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    /// Queue behind earlier commands.
    Send(Command),
    /// Write immediately, ahead of the queue.
    SendNow(Command),
    Stats,
    Help,
    Quit,
}

/// Geometry used to map `point` coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub view: (u32, u32),
    pub frame: (u32, u32),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str, geometry: Geometry) -> Result<Option<ShellAction>, RassistError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();
    let invalid = || RassistError::InvalidCommand(line.to_string());

    let action = match (verb.as_str(), args.as_slice()) {
        ("quit" | "exit", []) => ShellAction::Quit,
        ("stats", []) => ShellAction::Stats,
        ("help" | "?", []) => ShellAction::Help,
        ("move", [x, y]) => ShellAction::Send(Command::MouseMove {
            x: x.parse().map_err(|_| invalid())?,
            y: y.parse().map_err(|_| invalid())?,
        }),
        ("point", [x, y]) => {
            let vx: i32 = x.parse().map_err(|_| invalid())?;
            let vy: i32 = y.parse().map_err(|_| invalid())?;
            let (fw, fh) = geometry.frame;
            let (vw, vh) = geometry.view;
            let (x, y) = scale_to_frame(vx, vy, vw, vh, fw, fh)
                .ok_or_else(|| RassistError::Other("no frame received yet".into()))?;
            ShellAction::Send(Command::MouseMove { x, y })
        }
        ("click", rest) => {
            let button = match rest {
                [] => MouseButton::Left,
                [name] => button_by_name(name).ok_or_else(invalid)?,
                _ => return Err(invalid()),
            };
            ShellAction::Send(Command::MouseClick {
                button: button.code(),
            })
        }
        ("wheel", [delta]) => ShellAction::Send(Command::MouseWheel {
            delta: delta.parse().map_err(|_| invalid())?,
        }),
        ("key", [code]) => ShellAction::Send(Command::KeyPress {
            key_code: parse_key(code).ok_or_else(invalid)?,
        }),
        ("quality", [n]) => ShellAction::SendNow(format!("SET_QUALITY:{n}").parse()?),
        ("fps", [n]) => ShellAction::SendNow(format!("SET_FPS:{n}").parse()?),
        _ => match line.parse::<Command>()? {
            Command::Disconnect => ShellAction::Quit,
            command => ShellAction::Send(command),
        },
    };
    Ok(Some(action))
}

fn button_by_name(name: &str) -> Option<MouseButton> {
    match name.to_ascii_lowercase().as_str() {
        "left" => Some(MouseButton::Left),
        "middle" => Some(MouseButton::Middle),
        "right" => Some(MouseButton::Right),
        _ => None,
    }
}

fn parse_key(code: &str) -> Option<u32> {
    match code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => code.parse().ok(),
    }
}

// ── ConsoleListener ──────────────────────────────────────────────

/// Session listener that logs events and lets the shell wait for the
/// session to end.
#[derive(Default)]
pub struct ConsoleListener {
    frames: AtomicU64,
    last_error: Mutex<Option<String>>,
    closed: Notify,
}

impl ConsoleListener {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Resolves once the session has disconnected.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

impl SessionListener for ConsoleListener {
    fn on_connected(&self) {
        info!("session established");
    }

    fn on_disconnected(&self) {
        info!("session closed");
        self.closed.notify_one();
    }

    fn on_frame(&self, frame: Bitmap) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("frame {n}: {}x{}", frame.width, frame.height);
    }

    fn on_error(&self, message: &str) {
        error!("{message}");
        *self
            .last_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(message.to_string());
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: Geometry = Geometry {
        view: (960, 540),
        frame: (1920, 1080),
    };

    fn parse(line: &str) -> ShellAction {
        parse_line(line, GEOMETRY).unwrap().unwrap()
    }

    #[test]
    fn wire_commands_pass_through() {
        assert_eq!(
            parse("MOUSE_MOVE:100,250"),
            ShellAction::Send(Command::MouseMove { x: 100, y: 250 })
        );
        assert_eq!(parse("DISCONNECT"), ShellAction::Quit);
    }

    #[test]
    fn verbs_map_to_commands() {
        assert_eq!(
            parse("click"),
            ShellAction::Send(Command::MouseClick { button: 16 })
        );
        assert_eq!(
            parse("click right"),
            ShellAction::Send(Command::MouseClick { button: 4 })
        );
        assert_eq!(
            parse("key 0x41"),
            ShellAction::Send(Command::KeyPress { key_code: 65 })
        );
        assert_eq!(
            parse("wheel -2"),
            ShellAction::Send(Command::MouseWheel { delta: -2 })
        );
        assert_eq!(
            parse("quality 45"),
            ShellAction::SendNow(Command::SetQuality { percent: 45 })
        );
        assert_eq!(parse("fps 30"), ShellAction::SendNow(Command::SetFps { fps: 30 }));
    }

    #[test]
    fn point_maps_view_onto_frame() {
        assert_eq!(
            parse("point 480 270"),
            ShellAction::Send(Command::MouseMove { x: 960, y: 540 })
        );

        let empty = Geometry {
            view: (960, 540),
            frame: (0, 0),
        };
        assert!(parse_line("point 1 1", empty).is_err());
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse_line("", GEOMETRY).unwrap().is_none());
        assert!(parse_line("quality 0", GEOMETRY).is_err());
        assert!(parse_line("click sideways", GEOMETRY).is_err());
        assert!(parse_line("move 1", GEOMETRY).is_err());
        assert!(matches!(
            parse_line("CHAT:hi", GEOMETRY),
            Err(RassistError::UnknownCommand(_))
        ));
    }

    #[test]
    fn listener_records_errors() {
        let listener = ConsoleListener::default();
        listener.on_error("boom");
        assert_eq!(listener.last_error().as_deref(), Some("boom"));
    }
}
