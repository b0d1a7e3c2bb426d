//! Win32 `SendInput` mouse and keyboard injection.
//!
//! Used by the agent to replay commands received from the viewer.
//!
//! # Platform
//!
//! Windows-only. On other platforms [`SendInputInjector::new`] fails with
//! [`RassistError::Unsupported`].

use crate::error::RassistError;
use crate::protocol::MouseButton;
use crate::screen::InputInjector;

/// Injects mouse and keyboard events into the OS input stream.
///
/// `SendInput` requires the calling process to run in the same desktop
/// session as the user (or with `UIAccess` privileges).
#[derive(Debug)]
pub struct SendInputInjector {
    _private: (),
}

fn resolve_button(code: u32) -> Result<MouseButton, RassistError> {
    MouseButton::from_code(code)
        .ok_or_else(|| RassistError::Injection(format!("unknown mouse button code {code}")))
}

fn resolve_key(code: u32) -> Result<u16, RassistError> {
    u16::try_from(code)
        .ok()
        .filter(|vk| *vk != 0 && *vk <= 0xFE)
        .ok_or_else(|| RassistError::Injection(format!("key code {code} out of range")))
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;

    fn send(input: INPUT, what: &str) -> Result<(), RassistError> {
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 0 {
            return Err(RassistError::Injection(format!("SendInput ({what}) returned 0")));
        }
        Ok(())
    }

    fn mouse(dx: i32, dy: i32, mouse_data: u32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: mouse_data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn keyboard(vk: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    impl SendInputInjector {
        pub fn new() -> Result<Self, RassistError> {
            Ok(Self { _private: () })
        }
    }

    impl InputInjector for SendInputInjector {
        fn mouse_move(&self, x: u32, y: u32, frame_size: (u32, u32)) -> Result<(), RassistError> {
            let (frame_w, frame_h) = frame_size;
            if frame_w == 0 || frame_h == 0 {
                return Err(RassistError::Injection("empty frame size".into()));
            }
            // Absolute coordinates are normalised to 0..=65535 across the
            // primary display, so output-frame space maps directly.
            let abs_x = (x.min(frame_w - 1) as i64 * 65535 / (frame_w - 1).max(1) as i64) as i32;
            let abs_y = (y.min(frame_h - 1) as i64 * 65535 / (frame_h - 1).max(1) as i64) as i32;
            send(
                mouse(abs_x, abs_y, 0, MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE),
                "mouse move",
            )
        }

        fn mouse_press(&self, button: u32) -> Result<(), RassistError> {
            let flags = match resolve_button(button)? {
                MouseButton::Left => MOUSEEVENTF_LEFTDOWN,
                MouseButton::Middle => MOUSEEVENTF_MIDDLEDOWN,
                MouseButton::Right => MOUSEEVENTF_RIGHTDOWN,
            };
            send(mouse(0, 0, 0, flags), "mouse press")
        }

        fn mouse_release(&self, button: u32) -> Result<(), RassistError> {
            let flags = match resolve_button(button)? {
                MouseButton::Left => MOUSEEVENTF_LEFTUP,
                MouseButton::Middle => MOUSEEVENTF_MIDDLEUP,
                MouseButton::Right => MOUSEEVENTF_RIGHTUP,
            };
            send(mouse(0, 0, 0, flags), "mouse release")
        }

        fn mouse_wheel(&self, delta: i32) -> Result<(), RassistError> {
            // One notch is WHEEL_DELTA (120) units.
            let amount = delta.saturating_mul(120);
            send(mouse(0, 0, amount as u32, MOUSEEVENTF_WHEEL), "mouse wheel")
        }

        fn key_press(&self, key_code: u32) -> Result<(), RassistError> {
            let vk = resolve_key(key_code)?;
            send(keyboard(vk, KEYBD_EVENT_FLAGS(0)), "key press")
        }

        fn key_release(&self, key_code: u32) -> Result<(), RassistError> {
            let vk = resolve_key(key_code)?;
            send(keyboard(vk, KEYEVENTF_KEYUP), "key release")
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::*;

    const UNSUPPORTED: &str = "input injection is only available on Windows";

    impl SendInputInjector {
        pub fn new() -> Result<Self, RassistError> {
            Err(RassistError::Unsupported(UNSUPPORTED))
        }
    }

    impl InputInjector for SendInputInjector {
        fn mouse_move(&self, _x: u32, _y: u32, _frame: (u32, u32)) -> Result<(), RassistError> {
            Err(RassistError::Unsupported(UNSUPPORTED))
        }

        fn mouse_press(&self, button: u32) -> Result<(), RassistError> {
            resolve_button(button)?;
            Err(RassistError::Unsupported(UNSUPPORTED))
        }

        fn mouse_release(&self, button: u32) -> Result<(), RassistError> {
            resolve_button(button)?;
            Err(RassistError::Unsupported(UNSUPPORTED))
        }

        fn mouse_wheel(&self, _delta: i32) -> Result<(), RassistError> {
            Err(RassistError::Unsupported(UNSUPPORTED))
        }

        fn key_press(&self, key_code: u32) -> Result<(), RassistError> {
            resolve_key(key_code)?;
            Err(RassistError::Unsupported(UNSUPPORTED))
        }

        fn key_release(&self, key_code: u32) -> Result<(), RassistError> {
            resolve_key(key_code)?;
            Err(RassistError::Unsupported(UNSUPPORTED))
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
