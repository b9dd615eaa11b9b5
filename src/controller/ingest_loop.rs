//! # Ingest loop
//!
//! [`IngestLoop`] owns one broker session at a time. `start` connects,
//! prepares the sink and spawns a receive task; the task is the single
//! consumer of the transport's event queue and the only writer of the
//! session counters, so messages are decoded, appended and counted strictly
//! in arrival order.
//!
//! ```text
//!  start(config) ──▶ connect ──▶ open sink ──▶ SessionManager::start ──▶ spawn
//!                                                                          │
//!   BrokerEvent::Connected ──▶ subscribe(topic)                            ▼
//!   BrokerEvent::Message   ──▶ decode ──▶ encode_row ──▶ RowSink::append ──▶ record_message
//!                                                                          │
//!                                                   limit reached ──▶ stop + disconnect
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::Receiver;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::configuration::types::SessionConfig;
use crate::data_capture::decoder::decode_payload;
use crate::data_capture::row_codec::encode_row;
use crate::error_handling::types::{IngestError, SessionError, StorageError};
use crate::network::types::{BrokerConnector, BrokerEvent, BrokerHandle};
use crate::progress::metrics::IngestMetrics;
use crate::progress::reporter::{ProgressReporter, SessionSnapshot};
use crate::session_management::SessionManager;
use crate::storage::file_storage::FileStorage;
use crate::storage::storage_trait::RowSink;

/// Opens the sink for a session; called once per successful connect.
pub type SinkOpener =
    Arc<dyn Fn(&SessionConfig) -> Result<Arc<dyn RowSink>, StorageError> + Send + Sync>;

/// Result of handling one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// No session was receiving; the message was ignored.
    Dropped,
    /// Decoding or the sink append failed; the session goes on.
    Rejected,
    Persisted,
    /// Persisted, and the session hit its limit and is now idle.
    LimitReached,
}

struct RunningSession {
    id: Uuid,
    handle: Arc<dyn BrokerHandle>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Start/Stop/Status front of the ingest subsystem.
///
/// All three calls may be issued from any task. `start` returns as soon as
/// the broker acknowledged the connection; receipt happens in the background.
pub struct IngestLoop<C: BrokerConnector> {
    connector: C,
    open_sink: SinkOpener,
    session: Arc<Mutex<SessionManager>>,
    metrics: Arc<IngestMetrics>,
    running: Mutex<Option<RunningSession>>,
    /// Serializes `start` and `stop` against each other.
    control: tokio::sync::Mutex<()>,
    /// Wakes a `start` that is waiting on the broker.
    cancel_start: Notify,
}

impl<C: BrokerConnector> IngestLoop<C> {
    /// Creates a loop persisting rows to CSV files.
    pub fn new(connector: C) -> Self {
        let open_sink: SinkOpener = Arc::new(|config: &SessionConfig| {
            let storage = FileStorage::open(config.sink_path(), config.timestamp_format())?;
            Ok(Arc::new(storage) as Arc<dyn RowSink>)
        });
        Self::with_sink_opener(connector, open_sink)
    }

    pub fn with_sink_opener(connector: C, open_sink: SinkOpener) -> Self {
        Self {
            connector,
            open_sink,
            session: Arc::new(Mutex::new(SessionManager::new())),
            metrics: Arc::new(IngestMetrics::new()),
            running: Mutex::new(None),
            control: tokio::sync::Mutex::new(()),
            cancel_start: Notify::new(),
        }
    }

    /// Starts a session.
    ///
    /// # Errors
    ///
    /// - [`IngestError::Config`] if `config` fails validation
    /// - [`IngestError::Session`] if a session is already receiving
    /// - [`IngestError::Connection`] if the broker cannot be reached
    /// - [`IngestError::Storage`] if the sink cannot be created
    /// - [`IngestError::Session`] with [`SessionError::StartCancelled`] if
    ///   `stop` is called while the broker connection is pending
    ///
    /// On error the phase and counters are exactly as before the call.
    pub async fn start(&self, config: SessionConfig) -> Result<Uuid, IngestError> {
        let _control = self.control.lock().await;
        let cancelled = self.cancel_start.notified();

        config.validate()?;
        if self.lock_session().is_receiving() {
            return Err(SessionError::AlreadyActive.into());
        }
        self.reap_previous().await;

        let connection = tokio::select! {
            result = self.connector.connect(&config) => result.map_err(|e| {
                error!("Unable to connect to {}:{}: {}", config.broker_host(), config.broker_port(), e);
                e
            })?,
            _ = cancelled => {
                info!("Start cancelled while connecting to {}:{}", config.broker_host(), config.broker_port());
                return Err(SessionError::StartCancelled.into());
            }
        };
        let handle = connection.handle;

        let sink = match (self.open_sink)(&config) {
            Ok(sink) => sink,
            Err(e) => {
                error!("Unable to prepare sink {}: {}", config.sink_path().display(), e);
                let _ = handle.disconnect();
                return Err(e.into());
            }
        };

        let id = {
            let mut session = self.lock_session();
            match session.start(&config) {
                Ok(id) => {
                    self.metrics.reset();
                    id
                }
                Err(e) => {
                    drop(session);
                    let _ = handle.disconnect();
                    return Err(e.into());
                }
            }
        };

        info!(
            "[{}] Receiving {} from {}:{} into {}",
            id,
            config.topic(),
            config.broker_host(),
            config.broker_port(),
            sink.describe()
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let context = ReceiveContext {
            id,
            topic: config.topic().to_string(),
            session: Arc::clone(&self.session),
            metrics: Arc::clone(&self.metrics),
            sink,
            handle: Arc::clone(&handle),
        };
        let task = tokio::spawn(context.run(connection.events, cancel_rx));

        *self.lock_running() = Some(RunningSession {
            id,
            handle,
            cancel: cancel_tx,
            task,
        });
        Ok(id)
    }

    /// Stops the current session, if any. Safe to call repeatedly.
    ///
    /// A `start` still waiting on the broker is abandoned. Waits for the
    /// receive task to finish the message it may be handling.
    pub async fn stop(&self) {
        self.cancel_start.notify_waiters();
        let _control = self.control.lock().await;

        let was_receiving = self.lock_session().stop();
        let running = self.lock_running().take();

        match running {
            Some(running) => {
                let _ = running.cancel.send(true);
                if let Err(e) = running.handle.disconnect() {
                    warn!("[{}] Disconnect request failed: {}", running.id, e);
                }
                if let Err(e) = running.task.await {
                    error!("[{}] Receive task ended abnormally: {}", running.id, e);
                }
                debug!("[{}] Receive task joined", running.id);
            }
            None if was_receiving => warn!("Session was receiving without a receive task"),
            None => debug!("stop() called with no active session"),
        }
    }

    pub fn status(&self) -> SessionSnapshot {
        self.reporter().snapshot()
    }

    /// Observer sharing this loop's state, for a presentation layer.
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(Arc::clone(&self.session), Arc::clone(&self.metrics))
    }

    /// Joins the task of a session that already ended on its own.
    async fn reap_previous(&self) {
        let previous = self.lock_running().take();
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
            let _ = previous.handle.disconnect();
            if let Err(e) = previous.task.await {
                error!("[{}] Receive task ended abnormally: {}", previous.id, e);
            }
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionManager> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningSession>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// State moved into the receive task of one session.
pub(crate) struct ReceiveContext {
    pub(crate) id: Uuid,
    pub(crate) topic: String,
    pub(crate) session: Arc<Mutex<SessionManager>>,
    pub(crate) metrics: Arc<IngestMetrics>,
    pub(crate) sink: Arc<dyn RowSink>,
    pub(crate) handle: Arc<dyn BrokerHandle>,
}

impl ReceiveContext {
    async fn run(self, mut events: Receiver<BrokerEvent>, mut cancel: watch::Receiver<bool>) {
        debug!("[{}] Receive task started", self.id);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.changed() => {
                    debug!("[{}] Receive task cancelled", self.id);
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(BrokerEvent::Connected) => self.subscribe(),
                Some(BrokerEvent::Message {
                    topic,
                    payload,
                    received_at,
                }) => {
                    if self.handle_message(&topic, &payload, received_at)
                        == MessageOutcome::LimitReached
                    {
                        break;
                    }
                }
                Some(BrokerEvent::ConnectionLost(reason)) => {
                    warn!("[{}] Broker connection lost: {}", self.id, reason);
                }
                None => {
                    warn!("[{}] Broker event stream ended", self.id);
                    self.lock_session().stop();
                    break;
                }
            }
        }

        if let Err(e) = self.handle.disconnect() {
            warn!("[{}] Disconnect request failed: {}", self.id, e);
        }
        debug!("[{}] Receive task finished", self.id);
    }

    fn subscribe(&self) {
        match self.handle.subscribe(&self.topic) {
            Ok(()) => info!("[{}] Subscribed to {}", self.id, self.topic),
            Err(e) => error!("[{}] Subscribe to {} failed: {}", self.id, self.topic, e),
        }
    }

    /// Decodes, persists and counts one message.
    ///
    /// The session lock is held for the whole step so a concurrent `stop`
    /// either happens before the message (which is then dropped) or after it
    /// was fully counted.
    pub(crate) fn handle_message(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> MessageOutcome {
        self.metrics.record_received();
        let mut session = self.lock_session();

        if !session.is_receiving() {
            self.metrics.record_dropped();
            trace!("[{}] Dropping message on {}: session idle", self.id, topic);
            return MessageOutcome::Dropped;
        }

        let message = match decode_payload(payload) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_decode_error();
                warn!("[{}] Dropping undecodable message on {}: {}", self.id, topic, e);
                return MessageOutcome::Rejected;
            }
        };

        let row = encode_row(received_at, message);
        if let Err(e) = self.sink.append(&row) {
            self.metrics.record_write_error();
            error!(
                "[{}] Failed to append row to {}: {}",
                self.id,
                self.sink.describe(),
                e
            );
            return MessageOutcome::Rejected;
        }

        match session.record_message() {
            Ok(false) => MessageOutcome::Persisted,
            Ok(true) => {
                info!(
                    "[{}] Measurement limit of {} reached",
                    self.id,
                    session.state().limit
                );
                session.stop();
                MessageOutcome::LimitReached
            }
            Err(e) => {
                // cannot happen while the lock is held
                warn!("[{}] Message not counted: {}", self.id, e);
                MessageOutcome::Rejected
            }
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionManager> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }
}
