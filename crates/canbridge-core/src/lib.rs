//! canbridge-core - CAN to MQTT bridge core
//!
//! This crate holds everything the gateway does apart from serving HTTP:
//! persisted settings, the CAN controller abstraction, wireless and broker
//! connectivity with rate-limited reconnects, and the bridge loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BridgeSupervisor                         │
//! │  run flag (atomic)        Mutex<BridgeCore>                  │
//! │                                                             │
//! │  ┌─────────────┐  ┌─────────────────────┐  ┌─────────────┐  │
//! │  │ ConfigStore │  │ ConnectivityManager │  │  BusBridge  │  │
//! │  │ (settings)  │  │ (WiFi, MQTT, retry) │  │ (TX / RX)   │  │
//! │  └──────┬──────┘  └─────┬─────────┬─────┘  └──────┬──────┘  │
//! │         │               │         │               │         │
//! │  ┌──────┴──────┐ ┌──────┴─────┐ ┌─┴────────┐ ┌────┴──────┐  │
//! │  │  Settings   │ │WirelessLink│ │ Broker   │ │    Can    │  │
//! │  │  Storage    │ │ (nmcli)    │ │ Session  │ │Controller │  │
//! │  └─────────────┘ └────────────┘ └──────────┘ └───────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod connectivity;
pub mod controller;
pub mod error;
pub mod frame;
pub mod link;
pub mod settings;
pub mod store;
pub mod supervisor;

pub use bridge::{wall_clock_ns, BusBridge, BusOptions, NanoClock, PublishedRecord};
pub use connectivity::{
    ConnectionState, ConnectivityManager, LinkStatus, ReconnectAttempt, WirelessOutcome,
};
pub use controller::{CanController, ControllerClock, MockCanController};
pub use error::{BridgeError, ControllerError, FieldError, FrameError, LinkError, StoreError};
pub use frame::{topic_for, CanFrame, TelemetryRecord};
pub use link::{
    BrokerConnector, BrokerOptions, BrokerSession, MockBroker, MockWirelessLink, MqttConnector,
    NmcliWireless, StaticLink, WirelessCredentials, WirelessLink,
};
pub use settings::{parse_can_id, parse_port, Bitrate, CanMode, FramePayload, Settings, SettingsDelta};
pub use store::{ConfigStore, JsonFileStorage, MemoryStorage, SettingsStorage};
pub use supervisor::{
    ApplyReport, BridgeCore, BridgeOptions, BridgeSnapshot, BridgeSupervisor, BridgeTiming,
    IterationOutcome, StatusMessage, StepOutcome, APPLIED_MESSAGE,
};

// Re-export the SocketCAN controller (Linux + socketcan feature only)
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub use controller::socketcan::SocketCanController;
