//! Wireless and broker links
//!
//! - [`WirelessLink`]: association with the access point
//! - [`BrokerConnector`] / [`BrokerSession`]: MQTT sessions
//!
//! Implementations:
//! - NetworkManager (`nmcli`) wireless and a static always-up link
//! - rumqttc broker sessions
//! - Mocks for testing

pub mod mock;
pub mod mqtt;
pub mod wireless;

pub use mock::{MockBroker, MockWirelessLink};
pub use mqtt::MqttConnector;
pub use wireless::{NmcliWireless, StaticLink};

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::LinkError;
use crate::settings::Settings;

/// Access point credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessCredentials {
    pub ssid: String,
    pub password: String,
}

impl From<&Settings> for WirelessCredentials {
    fn from(settings: &Settings) -> Self {
        Self {
            ssid: settings.ssid.clone(),
            password: settings.password.clone(),
        }
    }
}

/// Everything needed to open a broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerOptions {
    pub fn from_settings(client_id: &str, settings: &Settings) -> Self {
        Self {
            client_id: client_id.to_string(),
            host: settings.mqtt_server.clone(),
            port: settings.mqtt_port,
            username: settings.mqtt_user.clone(),
            password: settings.mqtt_pass.clone(),
        }
    }
}

/// Wireless network stack
///
/// `connect` starts association and may return before the link is up;
/// callers poll `is_connected`.
#[async_trait]
pub trait WirelessLink: Send + Sync {
    async fn connect(&mut self, credentials: &WirelessCredentials) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;

    async fn is_connected(&self) -> bool;

    /// Address assigned to the device, if associated
    async fn local_address(&self) -> Option<IpAddr>;
}

/// Factory for broker sessions
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a session and wait for the broker to accept it
    async fn connect(&self, options: &BrokerOptions) -> Result<Box<dyn BrokerSession>, LinkError>;
}

/// An established broker session
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError>;

    /// False once the underlying transport has closed
    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), LinkError>;
}
