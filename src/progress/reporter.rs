use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::{IngestMetrics, MetricsSnapshot};
use crate::session_management::{SessionManager, SessionPhase};

/// Point-in-time view of the ingest session for a presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub phase: SessionPhase,
    pub start_time: Option<DateTime<Utc>>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub limit: u64,
    pub metrics: MetricsSnapshot,
    /// Set once any sink write failed during the session.
    pub degraded: bool,
}

/// Read-only observer of a running (or finished) session.
///
/// Cloning is cheap; the reporter never drives the receive loop.
#[derive(Clone)]
pub struct ProgressReporter {
    session: Arc<Mutex<SessionManager>>,
    metrics: Arc<IngestMetrics>,
}

impl ProgressReporter {
    pub fn new(session: Arc<Mutex<SessionManager>>, metrics: Arc<IngestMetrics>) -> Self {
        Self { session, metrics }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = {
            let session = self.session.lock().unwrap_or_else(|p| p.into_inner());
            session.state().clone()
        };
        let metrics = self.metrics.snapshot();

        SessionSnapshot {
            session_id: state.id,
            phase: state.phase,
            start_time: state.start_time,
            last_message_time: state.last_message_time,
            message_count: state.message_count,
            limit: state.limit,
            degraded: metrics.write_errors > 0,
            metrics,
        }
    }

    /// Logs one status line: start time, current time and received count.
    pub fn log_progress(&self) -> SessionSnapshot {
        let snapshot = self.snapshot();
        info!("{}", format_status(&snapshot, Utc::now()));
        snapshot
    }
}

fn local_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_status(snapshot: &SessionSnapshot, now: DateTime<Utc>) -> String {
    let limit = match snapshot.limit {
        0 => String::new(),
        n => format!("/{}", n),
    };
    let mut line = format!(
        "status: {} | started: {} | now: {} | received: {}{}",
        snapshot.phase,
        local_time(snapshot.start_time),
        local_time(Some(now)),
        snapshot.message_count,
        limit
    );
    let m = &snapshot.metrics;
    if m.decode_errors > 0 || m.write_errors > 0 {
        line.push_str(&format!(
            " | decode errors: {} | write errors: {}",
            m.decode_errors, m.write_errors
        ));
    }
    line
}
