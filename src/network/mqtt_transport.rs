//! # MQTT transport
//!
//! [`MqttConnector`] implements [`BrokerConnector`] on top of `rumqttc`.
//!
//! ```text
//! ┌──────────┐  poll()  ┌──────────────┐  mpsc  ┌──────────────┐
//! │  Broker  │─────────▶│  pump task   │───────▶│ receive task │
//! └──────────┘          │ (EventLoop)  │        │ (IngestLoop) │
//!       ▲               └──────────────┘        └──────┬───────┘
//!       │        subscribe / disconnect (AsyncClient)  │
//!       └──────────────────────────────────────────────┘
//! ```
//!
//! The pump task owns the `rumqttc` event loop. It forwards every incoming
//! publish in order, turns each CONNACK into [`BrokerEvent::Connected`] so the
//! receive task can (re)subscribe, and keeps polling after a network error,
//! which makes `rumqttc` reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, trace, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc::{self, Sender};
use uuid::Uuid;

use super::types::{BrokerConnection, BrokerConnector, BrokerEvent, BrokerHandle};
use crate::configuration::types::{BrokerSettings, SessionConfig};
use crate::error_handling::types::ConnectionError;

/// Requests buffered between an `AsyncClient` and its event loop.
const REQUEST_CAPACITY: usize = 16;

/// Floor for the configured packet size limit.
const MIN_PACKET_SIZE: usize = 10 * 1024;

#[derive(Debug, Clone)]
pub struct MqttConnector {
    keep_alive: Duration,
    connect_timeout: Duration,
    client_id_prefix: String,
    channel_capacity: usize,
    reconnect_delay: Duration,
    max_packet_size: usize,
}

impl MqttConnector {
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            // rumqttc refuses keep-alive intervals under one second
            keep_alive: Duration::from_secs(settings.keep_alive_secs.max(1)),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs.max(1)),
            client_id_prefix: settings.client_id_prefix.clone(),
            channel_capacity: settings.channel_capacity.max(1),
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_packet_size: settings.max_packet_size.max(MIN_PACKET_SIZE),
        }
    }

    pub(crate) fn options(&self, host: &str, port: u16) -> MqttOptions {
        let client_id = format!("{}-{}", self.client_id_prefix, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(self.keep_alive);
        // rumqttc defaults to 10 KiB, too small for long sample arrays
        options.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        options
    }

    /// Polls `eventloop` until the broker acknowledges the connection.
    pub(crate) async fn await_connack(
        &self,
        eventloop: &mut EventLoop,
        host: &str,
        port: u16,
    ) -> Result<(), ConnectionError> {
        let wait = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        debug!("CONNACK from {}:{}: {:?}", host, port, ack.code);
                        return Ok(());
                    }
                    Ok(other) => trace!("pre-connack event: {:?}", other),
                    Err(e) => return Err(map_connection_error(e)),
                }
            }
        };

        match tokio::time::timeout(self.connect_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(format!(
                "{}:{} did not answer within {:?}",
                host, port, self.connect_timeout
            ))),
        }
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new(&BrokerSettings::default())
    }
}

impl BrokerConnector for MqttConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<BrokerConnection, ConnectionError> {
        let host = config.broker_host().to_string();
        let port = config.broker_port();
        info!("Connecting to MQTT broker {}:{}", host, port);

        let (client, mut eventloop) =
            AsyncClient::new(self.options(&host, port), REQUEST_CAPACITY);
        self.await_connack(&mut eventloop, &host, port).await?;
        info!("Connected to MQTT broker {}:{}", host, port);

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        tx.send(BrokerEvent::Connected)
            .await
            .map_err(|_| ConnectionError::Closed)?;

        let closing = Arc::new(AtomicBool::new(false));
        tokio::spawn(pump_events(
            eventloop,
            tx,
            Arc::clone(&closing),
            self.reconnect_delay,
        ));

        Ok(BrokerConnection {
            events: rx,
            handle: Arc::new(MqttHandle { client, closing }),
        })
    }
}

struct MqttHandle {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
}

impl BrokerHandle for MqttHandle {
    fn subscribe(&self, topic: &str) -> Result<(), ConnectionError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| ConnectionError::SubscribeFailed(e.to_string()))
    }

    fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Requesting MQTT disconnect");
        self.client
            .try_disconnect()
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))
    }
}

async fn pump_events(
    mut eventloop: EventLoop,
    tx: Sender<BrokerEvent>,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    loop {
        let forward = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(
                    "PUBLISH on {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                Some(BrokerEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    received_at: Utc::now(),
                })
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Reconnected to MQTT broker");
                Some(BrokerEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("SUBACK: {:?}", ack.return_codes);
                None
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent, stopping MQTT pump");
                break;
            }
            Ok(_) => None,
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    debug!("MQTT event loop closed: {}", e);
                    break;
                }
                warn!(
                    "MQTT connection lost: {}, retrying in {:?}",
                    e, reconnect_delay
                );
                let lost = BrokerEvent::ConnectionLost(e.to_string());
                if tx.send(lost).await.is_err() {
                    break;
                }
                tokio::time::sleep(reconnect_delay).await;
                None
            }
        };

        if let Some(event) = forward {
            if tx.send(event).await.is_err() {
                debug!("Receive task gone, stopping MQTT pump");
                break;
            }
        }
        if tx.is_closed() {
            break;
        }
    }
}

fn map_connection_error(err: rumqttc::ConnectionError) -> ConnectionError {
    match err {
        rumqttc::ConnectionError::ConnectionRefused(code) => {
            error!("Broker refused connection: {:?}", code);
            ConnectionError::Refused(format!("{:?}", code))
        }
        other => {
            error!("Unable to reach broker: {}", other);
            ConnectionError::Unreachable(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // MQTT 3.1.1 variable-length "remaining length" field
    fn remaining_length(mut len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if len == 0 {
                return out;
            }
        }
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30];
        packet.extend(remaining_length(2 + topic.len() + payload.len()));
        packet.extend((topic.len() as u16).to_be_bytes());
        packet.extend(topic.as_bytes());
        packet.extend(payload);
        packet
    }

    fn connector(timeout_secs: u64) -> MqttConnector {
        MqttConnector::new(&BrokerSettings {
            connect_timeout_secs: timeout_secs,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn unreachable_broker_is_reported() {
        let _ = env_logger::builder().is_test(true).try_init();
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = SessionConfig::new("127.0.0.1", port, "t/x", "out.csv", 0).unwrap();

        let result = connector(2).connect(&config).await;
        assert!(matches!(result, Err(ConnectionError::Unreachable(_))));
    }

    #[tokio::test]
    async fn silent_broker_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // accept and hold the socket without ever answering CONNECT
        let holder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let config = SessionConfig::new("127.0.0.1", port, "t/x", "out.csv", 0).unwrap();
        let result = connector(1).connect(&config).await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
        holder.abort();
    }

    #[test]
    fn client_ids_are_unique() {
        let c = MqttConnector::default();
        let a = c.options("localhost", 1883);
        let b = c.options("localhost", 1883);
        assert!(a.client_id().starts_with("telemetry-ingest-"));
        assert_ne!(a.client_id(), b.client_id());
    }

    #[tokio::test]
    async fn large_publish_is_delivered() {
        let _ = env_logger::builder().is_test(true).try_init();
        let samples: Vec<String> = (0..3000).map(|i| format!("{}.5", i)).collect();
        let payload = format!(r#"{{"channel": 1, "samples": [{}]}}"#, samples.join(", "));
        assert!(payload.len() > 20 * 1024);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let packet = publish_packet("t/x", payload.as_bytes());
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut connect = [0u8; 1024];
            let _ = socket.read(&mut connect).await.unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            socket.write_all(&packet).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = SessionConfig::new("127.0.0.1", port, "t/x", "out.csv", 0).unwrap();
        let mut connection = connector(2).connect(&config).await.unwrap();

        let first = connection.events.recv().await;
        assert_eq!(first, Some(BrokerEvent::Connected));
        let second = tokio::time::timeout(Duration::from_secs(5), connection.events.recv())
            .await
            .unwrap();
        match second {
            Some(BrokerEvent::Message { topic, payload: received, .. }) => {
                assert_eq!(topic, "t/x");
                assert_eq!(received, payload.as_bytes());
            }
            other => panic!("expected the message, got {:?}", other),
        }

        connection.handle.disconnect().unwrap();
        broker.abort();
    }

    #[test]
    fn packet_size_limit_has_a_floor() {
        let c = MqttConnector::new(&BrokerSettings {
            max_packet_size: 0,
            ..Default::default()
        });
        assert_eq!(c.max_packet_size, MIN_PACKET_SIZE);
        assert_eq!(MqttConnector::default().max_packet_size, 1024 * 1024);
    }
}
