pub mod mqtt_transport;
pub mod types;

pub use mqtt_transport::MqttConnector;
pub use types::{BrokerConnection, BrokerConnector, BrokerEvent, BrokerHandle};
