//! Screen and input primitives the session engine drives.
//!
//! The agent session only decides *when* these run and *with what data*;
//! the work itself sits behind three traits so platforms (and tests) can
//! plug in their own implementations.
//!
//! | Trait             | Bundled implementation                       |
//! |-------------------|----------------------------------------------|
//! | [`ScreenCapturer`] | [`DxgiCapturer`] (Windows Desktop Duplication) |
//! | [`InputInjector`]  | [`SendInputInjector`] (Win32 `SendInput`)       |
//! | [`ImageCodec`]     | [`JpegCodec`] (`image` crate)                  |

pub mod capture;
pub mod input;
pub mod jpeg;
pub mod types;

pub use capture::DxgiCapturer;
pub use input::SendInputInjector;
pub use jpeg::JpegCodec;
pub use types::{Bitmap, PixelFormat};

use crate::error::RassistError;

/// Produces a full-screen bitmap on demand.
///
/// Called from the blocking thread pool, one session at a time.
pub trait ScreenCapturer: Send + 'static {
    fn capture(&mut self) -> Result<Bitmap, RassistError>;
}

/// Replays input events on the local desktop.
///
/// `button` and `key_code` follow [`crate::protocol::MouseButton`] and
/// Windows virtual-key codes respectively. Pointer coordinates are given
/// in output-frame space together with that frame's size; implementations
/// map them onto the real display.
pub trait InputInjector: Send + Sync + 'static {
    fn mouse_move(&self, x: u32, y: u32, frame_size: (u32, u32)) -> Result<(), RassistError>;
    fn mouse_press(&self, button: u32) -> Result<(), RassistError>;
    fn mouse_release(&self, button: u32) -> Result<(), RassistError>;
    fn mouse_wheel(&self, delta: i32) -> Result<(), RassistError>;
    fn key_press(&self, key_code: u32) -> Result<(), RassistError>;
    fn key_release(&self, key_code: u32) -> Result<(), RassistError>;
}

/// Compresses bitmaps for the wire and back.
pub trait ImageCodec: Send + Sync + 'static {
    /// Encode at `quality` percent (1..=100).
    fn encode(&self, bitmap: &Bitmap, quality: u8) -> Result<Vec<u8>, RassistError>;
    fn decode(&self, bytes: &[u8]) -> Result<Bitmap, RassistError>;
}
