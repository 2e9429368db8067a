//! Daemon configuration (TOML)
//!
//! Deployment settings that the web form does not edit: where to listen,
//! which CAN and WiFi interfaces to drive, MQTT client identity and loop
//! timing. Every field has a default, so an empty file is valid.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use canbridge_core::{BridgeOptions, BridgeTiming, ControllerClock};
use serde::Deserialize;

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// JSON document holding the form-editable settings
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub can: CanConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub wifi: WifiConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
            http: HttpConfig::default(),
            can: CanConfig::default(),
            mqtt: MqttConfig::default(),
            wifi: WifiConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            client_id: self.mqtt.client_id.clone(),
            topic_prefix: self.mqtt.topic_prefix.clone(),
            controller_clock: self.can.clock,
            timing: self.bridge.timing(self.mqtt.timeout_secs),
        }
    }
}

fn default_settings_file() -> PathBuf {
    PathBuf::from("config.json")
}

// =============================================================================
// [http]
// =============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_listen() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8885
}

fn default_request_timeout_secs() -> u64 {
    30
}

// =============================================================================
// [can]
// =============================================================================

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CanBackend {
    #[default]
    Socketcan,
    /// In-memory controller; loopback frames echo back, nothing else arrives
    Mock,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CanConfig {
    #[serde(default)]
    pub backend: CanBackend,

    #[serde(default = "default_can_interface")]
    pub interface: String,

    /// Bring the interface down/up and program its bitrate over netlink
    #[serde(default)]
    pub manage_interface: bool,

    #[serde(default)]
    pub clock: ControllerClock,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            backend: CanBackend::default(),
            interface: default_can_interface(),
            manage_interface: false,
            clock: ControllerClock::default(),
        }
    }
}

fn default_can_interface() -> String {
    "can0".to_string()
}

// =============================================================================
// [mqtt]
// =============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Bound on connect and publish
    #[serde(default = "default_mqtt_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            timeout_secs: default_mqtt_timeout_secs(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_client_id() -> String {
    "canbridge".to_string()
}

fn default_topic_prefix() -> String {
    "can/".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_timeout_secs() -> u64 {
    5
}

// =============================================================================
// [wifi]
// =============================================================================

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WifiBackend {
    /// NetworkManager via `nmcli`
    #[default]
    Nmcli,
    /// Network is managed elsewhere; always treated as up
    Static,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WifiConfig {
    #[serde(default)]
    pub backend: WifiBackend,

    #[serde(default = "default_wifi_interface")]
    pub interface: String,

    /// Reported on the status page for the static backend
    #[serde(default)]
    pub address: Option<IpAddr>,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            backend: WifiBackend::default(),
            interface: default_wifi_interface(),
            address: None,
        }
    }
}

fn default_wifi_interface() -> String {
    "wlan0".to_string()
}

// =============================================================================
// [bridge]
// =============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Start bridging at boot instead of waiting for `/start`
    #[serde(default)]
    pub autostart: bool,

    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    #[serde(default = "default_wifi_connect_timeout_secs")]
    pub wifi_connect_timeout_secs: u64,

    #[serde(default = "default_wifi_poll_interval_ms")]
    pub wifi_poll_interval_ms: u64,

    #[serde(default = "default_self_test_pause_ms")]
    pub self_test_pause_ms: u64,

    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,

    #[serde(default = "default_rx_poll_interval_ms")]
    pub rx_poll_interval_ms: u64,

    #[serde(default = "default_error_pause_ms")]
    pub error_pause_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            reconnect_interval_secs: default_reconnect_interval_secs(),
            wifi_connect_timeout_secs: default_wifi_connect_timeout_secs(),
            wifi_poll_interval_ms: default_wifi_poll_interval_ms(),
            self_test_pause_ms: default_self_test_pause_ms(),
            idle_pause_ms: default_idle_pause_ms(),
            rx_poll_interval_ms: default_rx_poll_interval_ms(),
            error_pause_ms: default_error_pause_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn timing(&self, broker_timeout_secs: u64) -> BridgeTiming {
        BridgeTiming {
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            wifi_connect_timeout: Duration::from_secs(self.wifi_connect_timeout_secs),
            wifi_poll_interval: Duration::from_millis(self.wifi_poll_interval_ms),
            broker_timeout: Duration::from_secs(broker_timeout_secs),
            self_test_pause: Duration::from_millis(self.self_test_pause_ms),
            idle_pause: Duration::from_millis(self.idle_pause_ms),
            rx_poll_interval: Duration::from_millis(self.rx_poll_interval_ms),
            error_pause: Duration::from_millis(self.error_pause_ms),
        }
    }
}

fn default_reconnect_interval_secs() -> u64 {
    10
}

fn default_wifi_connect_timeout_secs() -> u64 {
    10
}

fn default_wifi_poll_interval_ms() -> u64 {
    1000
}

fn default_self_test_pause_ms() -> u64 {
    1000
}

fn default_idle_pause_ms() -> u64 {
    1000
}

fn default_rx_poll_interval_ms() -> u64 {
    10
}

fn default_error_pause_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.http.port, 8885);
        assert_eq!(config.can.interface, "can0");
        assert_eq!(config.wifi.backend, WifiBackend::Nmcli);
        assert!(!config.bridge.autostart);
    }

    #[test]
    fn test_default_timing_matches_bridge_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.bridge_options().timing, BridgeTiming::default());
        assert_eq!(config.bridge_options().client_id, "canbridge");
        assert_eq!(config.bridge_options().topic_prefix, "can/");
    }

    #[test]
    fn test_parse_full_config() {
        let config = DaemonConfig::parse(
            r#"
            settings_file = "/var/lib/canbridge/config.json"

            [http]
            listen = "127.0.0.1"
            port = 8080

            [can]
            backend = "mock"
            interface = "vcan0"
            manage_interface = true
            clock = "16mhz"

            [mqtt]
            client_id = "gateway-7"
            topic_prefix = "vehicle/can/"

            [wifi]
            backend = "static"
            address = "10.0.0.9"

            [bridge]
            autostart = true
            reconnect_interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(
            config.settings_file,
            PathBuf::from("/var/lib/canbridge/config.json")
        );
        assert_eq!(config.http.listen, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.can.backend, CanBackend::Mock);
        assert_eq!(config.can.clock, ControllerClock::Mhz16);
        assert_eq!(config.wifi.backend, WifiBackend::Static);
        assert!(config.bridge.autostart);

        let options = config.bridge_options();
        assert_eq!(options.client_id, "gateway-7");
        assert_eq!(options.timing.reconnect_interval, Duration::from_secs(30));
        assert_eq!(options.timing.idle_pause, Duration::from_secs(1));
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = DaemonConfig::parse(include_str!("../../../config/canbridged.toml")).unwrap();
        assert_eq!(config.http.port, 8885);
        assert!(config.can.manage_interface);
        assert_eq!(config.bridge_options().timing, BridgeTiming::default());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(DaemonConfig::parse("[can]\nbitrate = 500\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canbridged.toml");
        std::fs::write(&path, "[http]\nport = 9000\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.http.port, 9000);

        assert!(DaemonConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
