//! Session state tracking.

pub mod session;

pub use session::{SessionState, SessionStateCell};
