//! # rassist-viewer
//!
//! Console client for a rassist agent. Connects, logs frame statistics
//! and forwards commands typed on stdin, either in the wire form
//! (`MOUSE_CLICK:16`) or as short shell verbs (`click left`).

pub mod config;
pub mod shell;
