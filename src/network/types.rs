use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Receiver;

use crate::configuration::types::SessionConfig;
use crate::error_handling::types::ConnectionError;

/// Everything the transport reports to the receive task, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// The broker acknowledged a connection (the first one, or a reconnect).
    /// Subscriptions are issued in response to this event.
    Connected,
    Message {
        topic: String,
        payload: Vec<u8>,
        received_at: DateTime<Utc>,
    },
    /// The connection dropped; the transport keeps retrying.
    ConnectionLost(String),
}

/// Control side of an established broker connection.
///
/// Both calls only enqueue a request and never block on the network.
pub trait BrokerHandle: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), ConnectionError>;

    /// Idempotent; calling it on an already closed connection is not an error.
    fn disconnect(&self) -> Result<(), ConnectionError>;
}

/// A live connection: the event queue plus its control handle.
pub struct BrokerConnection {
    pub events: Receiver<BrokerEvent>,
    pub handle: Arc<dyn BrokerHandle>,
}

/// Establishes broker connections for the ingest loop.
///
/// `connect` resolves once the broker acknowledged the connection, so
/// unreachable brokers are reported to the caller of `IngestLoop::start`. The
/// first item on the returned event queue is [`BrokerEvent::Connected`].
pub trait BrokerConnector: Send + Sync + 'static {
    fn connect(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<BrokerConnection, ConnectionError>> + Send;
}
