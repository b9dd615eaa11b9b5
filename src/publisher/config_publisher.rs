use std::time::Duration;

use log::{debug, info, trace};
use rumqttc::{AsyncClient, Event, Outgoing, Packet, QoS};
use serde_json::{Map, Value};

use crate::error_handling::types::{ConnectionError, PublishError};
use crate::network::mqtt_transport::MqttConnector;

/// One-shot sender of a configuration message to devices.
///
/// Each call opens its own connection, publishes once with QoS 1, waits for
/// the broker's PUBACK and disconnects.
pub struct ConfigPublisher {
    connector: MqttConnector,
    ack_timeout: Duration,
}

impl ConfigPublisher {
    pub fn new(connector: MqttConnector) -> Self {
        Self {
            connector,
            ack_timeout: Duration::from_secs(5),
        }
    }

    pub async fn publish(
        &self,
        host: &str,
        port: u16,
        topic: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), PublishError> {
        if topic.is_empty() || topic.contains(|c| c == '+' || c == '#') {
            return Err(PublishError::InvalidField {
                name: "topic".to_string(),
                reason: format!("{:?} is not a valid publish topic", topic),
            });
        }

        let body = Value::Object(payload.clone()).to_string();
        info!("Publishing configuration to {}: {}", topic, body);

        let (client, mut eventloop) = AsyncClient::new(self.connector.options(host, port), 10);
        self.connector
            .await_connack(&mut eventloop, host, port)
            .await?;

        client
            .publish(topic, QoS::AtLeastOnce, false, body.into_bytes())
            .await
            .map_err(|e| ConnectionError::PublishFailed(e.to_string()))?;

        let acked = tokio::time::timeout(self.ack_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!("PUBACK for packet {}", ack.pkid);
                        return Ok(());
                    }
                    Ok(other) => trace!("publish event: {:?}", other),
                    Err(e) => return Err(ConnectionError::PublishFailed(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| {
            ConnectionError::Timeout(format!("no PUBACK within {:?}", self.ack_timeout))
        })?;
        acked?;

        // publish is acknowledged at this point, disconnect errors are ignored
        if client.disconnect().await.is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(1), async {
                while let Ok(event) = eventloop.poll().await {
                    if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                        break;
                    }
                }
            })
            .await;
        }

        info!("Configuration sent to {}", topic);
        Ok(())
    }
}
