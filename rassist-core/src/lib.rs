//! # rassist-core
//!
//! Session engine for viewing and controlling a remote desktop over a
//! local network.
//!
//! This crate contains:
//! - **Protocol**: `Command` model with its canonical text form, port and defaults
//! - **Codec**: `FrameCodec` and `CommandCodec` for framed TCP I/O via `tokio_util`
//! - **Agent**: `Agent` listener and `AgentSession` (frame producer + command consumer)
//! - **Viewer**: `ViewerSession` (frame receiver + command sender), stats, coordinate mapping
//! - **State**: `SessionState` machine with a single-winner close
//! - **Screen**: capture / injection / image codec traits plus Windows and JPEG implementations
//! - **Error**: `RassistError`, typed, `thiserror`-based

pub mod agent;
pub mod codec;
mod deadline;
pub mod error;
pub mod protocol;
pub mod screen;
pub mod state;
pub mod viewer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use agent::{Agent, AgentSession, AgentSessionConfig, EndReason, Primitives, SessionSummary};
pub use codec::{CommandCodec, FrameCodec};
pub use error::RassistError;
pub use protocol::{Command, DEFAULT_PORT, MouseButton};
pub use screen::{
    Bitmap, DxgiCapturer, ImageCodec, InputInjector, JpegCodec, PixelFormat, ScreenCapturer,
    SendInputInjector,
};
pub use state::{SessionState, SessionStateCell};
pub use viewer::{SessionListener, ViewerSession, ViewerSessionConfig, ViewerStats, scale_to_frame};
