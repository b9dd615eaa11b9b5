//! Session management core module.
//!
//! This module provides the session phase, the per-session state record and
//! the state machine deciding when a session starts, counts and stops.

use serde::{Deserialize, Serialize};

/// Submodule for session data structures.
pub mod session;
/// Submodule for the session state machine.
pub mod session_manager;

pub use session::SessionState;
pub use session_manager::SessionManager;

/// Represents the current phase of the ingest session.
///
/// Variants:
/// - `Idle`: No session is receiving. Initial state, and the state between sessions.
/// - `Receiving`: A session is active and accepting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Receiving,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Receiving => write!(f, "receiving"),
        }
    }
}
