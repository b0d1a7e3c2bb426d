//! Protocol constants and message types.
//!
//! # Wire Protocol
//!
//! One TCP connection carries two independent channels:
//!
//! ```text
//! Agent  ──[i32 BE length][encoded image]────► Viewer   (repeated)
//! Viewer ──[u16 BE length][command text]─────► Agent    (repeated)
//! ```
//!
//! Framing lives in [`crate::codec`]; the command grammar in [`command`].

pub mod command;

pub use command::{Command, MouseButton};

/// Well-known agent port shared by agent and viewer configuration.
pub const DEFAULT_PORT: u16 = 5555;

/// Default output resolution every captured frame is resampled to.
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1920;
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 1080;

/// Default encoder quality in percent.
pub const DEFAULT_QUALITY: u8 = 70;

/// Default capture cadence in frames per second.
pub const DEFAULT_FPS: u8 = 10;

/// Clamp a quality value into the valid 1..=100 range.
pub const fn clamp_quality(quality: u8) -> u8 {
    if quality < 1 {
        1
    } else if quality > 100 {
        100
    } else {
        quality
    }
}

/// Clamp a cadence value into the valid 1..=60 range.
pub const fn clamp_fps(fps: u8) -> u8 {
    if fps < 1 {
        1
    } else if fps > 60 {
        60
    } else {
        fps
    }
}
