use crate::configuration::types::SessionConfig;
use crate::error_handling::types::SessionError;
use crate::session_management::session::SessionState;
use crate::session_management::SessionPhase;
use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

/// The Idle/Receiving state machine of the ingest loop.
///
/// The manager owns the message counter and the configured limit and decides
/// when a session has reached its limit. It performs no I/O; the ingest loop
/// wraps it in a mutex and is its only writer.
///
/// # Transitions
///
/// - `start`: `Idle` → `Receiving`, resets the counter. Rejected with
///   [`SessionError::AlreadyActive`] while receiving.
/// - `record_message`: counts one persisted message while `Receiving`.
/// - `stop`: any phase → `Idle`, idempotent, counters kept.
#[derive(Debug, Default)]
pub struct SessionManager {
    state: SessionState,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new session for `config` and returns its id.
    pub fn start(&mut self, config: &SessionConfig) -> Result<Uuid, SessionError> {
        if self.is_receiving() {
            return Err(SessionError::AlreadyActive);
        }

        let id = Uuid::new_v4();
        self.state = SessionState {
            id: Some(id),
            phase: SessionPhase::Receiving,
            message_count: 0,
            limit: config.measurement_limit(),
            start_time: Some(Utc::now()),
            last_message_time: None,
            end_time: None,
        };
        info!(
            "[{}] Session started (limit: {})",
            id,
            match self.state.limit {
                0 => "unlimited".to_string(),
                n => n.to_string(),
            }
        );
        Ok(id)
    }

    /// Counts one accepted message.
    ///
    /// Returns `true` when the configured limit has now been reached; the
    /// caller is then expected to `stop` the session.
    pub fn record_message(&mut self) -> Result<bool, SessionError> {
        if !self.is_receiving() {
            return Err(SessionError::NotReceiving);
        }

        self.state.message_count += 1;
        self.state.last_message_time = Some(Utc::now());
        debug!(
            "[{}] message #{} recorded",
            self.session_label(),
            self.state.message_count
        );

        Ok(self.limit_reached())
    }

    /// Moves to `Idle`. Returns `true` if a session was actually receiving.
    pub fn stop(&mut self) -> bool {
        if !self.is_receiving() {
            return false;
        }
        self.state.phase = SessionPhase::Idle;
        self.state.end_time = Some(Utc::now());
        info!(
            "[{}] Session stopped after {} message(s)",
            self.session_label(),
            self.state.message_count
        );
        true
    }

    pub fn is_receiving(&self) -> bool {
        self.state.phase == SessionPhase::Receiving
    }

    pub fn limit_reached(&self) -> bool {
        self.state.limit > 0 && self.state.message_count >= self.state.limit
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session_label(&self) -> String {
        self.state
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}
