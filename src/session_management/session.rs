use crate::session_management::SessionPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutable state of the current (or last) session.
///
/// Counters survive `stop` and are only reset by the next `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: Option<Uuid>,
    pub phase: SessionPhase,
    pub message_count: u64,
    /// `0` means unlimited.
    pub limit: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}
