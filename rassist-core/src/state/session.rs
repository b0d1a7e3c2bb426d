//! Session state machine shared by the agent and viewer sessions.
//!
//! The state lives in a single atomic so any task (frame path, command
//! path, a local `disconnect()` call) can drive a transition without a
//! lock, and exactly one of them wins the move to `Closed`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::RassistError;

// ── SessionState ─────────────────────────────────────────────────

/// The current phase of a session.
///
/// ```text
///  Connecting ──► Active ──► Closing ──► Closed
///       │            │                     ▲
///       └────────────┴─────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SessionState {
    /// TCP connection initiated but not yet established.
    #[default]
    Connecting = 0,
    /// Both session tasks are running.
    Active = 1,
    /// Teardown requested; tasks are unwinding.
    Closing = 2,
    /// Terminal. Socket and tasks have been released.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    pub fn is_active(self) -> bool {
        self == SessionState::Active
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Active => write!(f, "Active"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

// ── SessionStateCell ─────────────────────────────────────────────

/// Lock-free holder of a [`SessionState`] with validated transitions.
#[derive(Debug, Default)]
pub struct SessionStateCell {
    state: AtomicU8,
}

impl SessionStateCell {
    pub fn new(initial: SessionState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to `Active`.
    ///
    /// Valid from: `Connecting`.
    pub fn activate(&self) -> Result<(), RassistError> {
        self.transition(SessionState::Connecting, SessionState::Active)
            .map_err(|_| RassistError::InvalidState("cannot activate: not Connecting"))
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: `Connecting`, `Active`. Returns `false` when the session
    /// is already closing or closed, so callers can tell whether they were
    /// the one that started teardown.
    pub fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match SessionState::from_u8(current) {
                SessionState::Connecting | SessionState::Active => {}
                SessionState::Closing | SessionState::Closed => return false,
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Transition to `Closed`.
    ///
    /// Valid from every other state. Returns `true` for exactly one caller
    /// over the lifetime of the cell; that caller owns resource release.
    pub fn close(&self) -> bool {
        self.state.swap(SessionState::Closed as u8, Ordering::AcqRel) != SessionState::Closed as u8
    }

    /// Compare-and-set from `from` to `to`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SessionState::from_u8)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn happy_path() {
        let cell = SessionStateCell::new(SessionState::Connecting);
        cell.activate().unwrap();
        assert!(cell.get().is_active());
        assert!(cell.begin_close());
        assert_eq!(cell.get(), SessionState::Closing);
        assert!(cell.close());
        assert!(cell.get().is_closed());
    }

    #[test]
    fn cannot_activate_twice() {
        let cell = SessionStateCell::new(SessionState::Connecting);
        cell.activate().unwrap();
        assert!(matches!(cell.activate(), Err(RassistError::InvalidState(_))));
    }

    #[test]
    fn begin_close_only_once() {
        let cell = SessionStateCell::new(SessionState::Active);
        assert!(cell.begin_close());
        assert!(!cell.begin_close());
        assert!(cell.close());
        assert!(!cell.begin_close());
    }

    #[test]
    fn close_wins_exactly_once_across_threads() {
        let cell = Arc::new(SessionStateCell::new(SessionState::Active));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || cell.close())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn display() {
        assert_eq!(SessionState::Closing.to_string(), "Closing");
    }
}
