//! Domain-specific error types for the remote assistance protocol.
//!
//! All fallible operations return `Result<T, RassistError>`.
//! Session tasks classify these into transient (log and continue) and
//! connection-fatal (tear the session down) via [`RassistError::is_fatal`].

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the rassist protocol and session engine.
#[derive(Debug, Error)]
pub enum RassistError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame length field was zero, negative or above the limit.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// The peer kept sending malformed messages.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A command string could not be parsed.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A well-formed command whose name this build does not know.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The payload exceeds what the wire format can carry.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The session is not connected.
    #[error("not connected")]
    NotConnected,

    /// The outbound command queue was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A local call did not fit the session's lifecycle phase.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Collaborator Errors ──────────────────────────────────────
    /// Screen capture failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Input injection failed.
    #[error("injection failed: {0}")]
    Injection(String),

    /// Image encoding or decoding failed.
    #[error("image codec error: {0}")]
    Image(String),

    /// The requested primitive does not exist on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl RassistError {
    /// Whether this error ends the session when a session task hits it.
    ///
    /// Capture, codec, injection and single-message parse errors are
    /// transient; socket, timeout and repeated-violation errors are fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RassistError::Connection(_)
                | RassistError::Timeout(_)
                | RassistError::ProtocolViolation(_)
                | RassistError::NotConnected
                | RassistError::ChannelClosed
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<image::ImageError> for RassistError {
    fn from(e: image::ImageError) -> Self {
        RassistError::Image(e.to_string())
    }
}
