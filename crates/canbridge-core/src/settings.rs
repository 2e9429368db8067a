//! Bridge settings
//!
//! [`Settings`] is the fixed-schema record persisted across restarts.
//! [`SettingsDelta`] is a partial update built by the request layer and
//! applied through [`crate::store::ConfigStore::replace`].
//!
//! The serialized layout keeps the key names of the device's historic
//! `config.json`, so documents written by older firmware load unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FieldError, FrameError};
use crate::frame::CanFrame;

/// Largest valid (29-bit extended) CAN identifier
pub const MAX_CAN_ID: u32 = 0x1FFF_FFFF;

/// Largest 11-bit standard CAN identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

// =============================================================================
// Bitrate
// =============================================================================

/// Supported CAN bus bitrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bitrate {
    Kbps10,
    Kbps20,
    Kbps50,
    Kbps100,
    #[default]
    Kbps125,
    Kbps250,
    Kbps500,
}

impl Bitrate {
    /// All supported rates, slowest first
    pub const ALL: [Bitrate; 7] = [
        Bitrate::Kbps10,
        Bitrate::Kbps20,
        Bitrate::Kbps50,
        Bitrate::Kbps100,
        Bitrate::Kbps125,
        Bitrate::Kbps250,
        Bitrate::Kbps500,
    ];

    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::Kbps10 => 10,
            Bitrate::Kbps20 => 20,
            Bitrate::Kbps50 => 50,
            Bitrate::Kbps100 => 100,
            Bitrate::Kbps125 => 125,
            Bitrate::Kbps250 => 250,
            Bitrate::Kbps500 => 500,
        }
    }

    pub fn bits_per_second(self) -> u32 {
        self.kbps() * 1000
    }

    pub fn from_kbps(kbps: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|rate| rate.kbps() == kbps)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kbps())
    }
}

impl FromStr for Bitrate {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Bitrate::from_kbps)
            .ok_or_else(|| FieldError::UnsupportedBitrate {
                field: "bitrate",
                value: s.to_string(),
            })
    }
}

impl Serialize for Bitrate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Bitrate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older documents may carry the rate as a bare number
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u32),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Bitrate::from_kbps(n)
                .ok_or_else(|| serde::de::Error::custom(format!("unsupported bitrate {}", n))),
        }
    }
}

// =============================================================================
// Operating mode
// =============================================================================

/// CAN controller operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanMode {
    /// Diagnostic self-test: transmitted frames are read back without wiring
    #[default]
    Loopback,
    /// Normal bus participation
    Normal,
}

impl CanMode {
    pub const ALL: [CanMode; 2] = [CanMode::Loopback, CanMode::Normal];

    /// Whether the bridge loop should transmit the test frame each iteration
    pub fn is_diagnostic(self) -> bool {
        self == CanMode::Loopback
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanMode::Loopback => "loopback",
            CanMode::Normal => "normal",
        }
    }
}

impl fmt::Display for CanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanMode {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loopback" => Ok(CanMode::Loopback),
            "normal" => Ok(CanMode::Normal),
            _ => Err(FieldError::UnknownMode {
                field: "can_mode",
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Test frame payload
// =============================================================================

/// Payload of the outgoing test frame (0..=8 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramePayload(Vec<u8>);

impl FramePayload {
    pub fn new(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > CanFrame::MAX_DATA_LEN {
            return Err(FrameError::PayloadTooLong(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Parse hex bytes, with or without separating spaces ("12 34", "1234")
    pub fn parse_hex(s: &str) -> Result<Self, FieldError> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&compact).map_err(|_| FieldError::InvalidHex {
            field: "data_hex",
            value: s.to_string(),
        })?;
        Self::new(&bytes).map_err(|_| FieldError::PayloadTooLong {
            field: "data_hex",
            len: bytes.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for FramePayload {
    fn default() -> Self {
        Self(vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0])
    }
}

/// Space-separated upper-case hex, e.g. `12 34 56`
impl fmt::Display for FramePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl Serialize for FramePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FramePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FramePayload::parse_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a hex CAN identifier ("100", "0x7DF", "18DAF100")
pub fn parse_can_id(s: &str) -> Result<u32, FieldError> {
    let trimmed = s.trim();
    let cleaned = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let id = u32::from_str_radix(cleaned, 16).map_err(|_| FieldError::InvalidHex {
        field: "can_id",
        value: s.to_string(),
    })?;

    if id > MAX_CAN_ID {
        return Err(FieldError::IdOutOfRange {
            field: "can_id",
            id,
        });
    }
    Ok(id)
}

/// Parse a broker port; zero is rejected
pub fn parse_port(s: &str) -> Result<u16, FieldError> {
    match s.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(FieldError::InvalidPort {
            field: "mqtt_port",
            value: s.to_string(),
        }),
    }
}

mod can_id_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:X}", id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_can_id(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Settings record
// =============================================================================

/// Complete bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "SSID")]
    pub ssid: String,
    #[serde(rename = "PASSWORD")]
    pub password: String,
    #[serde(rename = "MQTT_SERVER")]
    pub mqtt_server: String,
    #[serde(rename = "MQTT_PORT")]
    pub mqtt_port: u16,
    #[serde(rename = "MQTT_USER")]
    pub mqtt_user: Option<String>,
    #[serde(rename = "MQTT_PASS")]
    pub mqtt_pass: Option<String>,
    pub bitrate: Bitrate,
    /// Identifier of the outgoing test frame
    #[serde(with = "can_id_hex")]
    pub can_id: u32,
    /// Payload of the outgoing test frame
    #[serde(rename = "data_hex")]
    pub payload: FramePayload,
    pub can_mode: CanMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssid: "your_ssid".to_string(),
            password: "your_pass".to_string(),
            mqtt_server: "your_mqtt".to_string(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_pass: None,
            bitrate: Bitrate::default(),
            can_id: 0x100,
            payload: FramePayload::default(),
            can_mode: CanMode::default(),
        }
    }
}

impl Settings {
    /// Build the outgoing test frame from `can_id`/`payload`
    pub fn test_frame(&self) -> Result<CanFrame, FrameError> {
        CanFrame::new(self.can_id, self.payload.as_bytes())
    }

    /// Compare two settings records and report which subsystems are affected
    pub fn changes_from(&self, previous: &Settings) -> SettingsChanges {
        SettingsChanges {
            wireless: self.ssid != previous.ssid || self.password != previous.password,
            broker: self.mqtt_server != previous.mqtt_server
                || self.mqtt_port != previous.mqtt_port
                || self.mqtt_user != previous.mqtt_user
                || self.mqtt_pass != previous.mqtt_pass,
            bus: self.bitrate != previous.bitrate || self.can_mode != previous.can_mode,
            frame: self.can_id != previous.can_id || self.payload != previous.payload,
        }
    }
}

/// Which subsystems a settings change touches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChanges {
    pub wireless: bool,
    pub broker: bool,
    pub bus: bool,
    pub frame: bool,
}

impl SettingsChanges {
    pub fn any(&self) -> bool {
        self.wireless || self.broker || self.bus || self.frame
    }
}

/// Partial settings update; `None` leaves the field unchanged
///
/// `mqtt_user`/`mqtt_pass` are doubly optional so a delta can clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDelta {
    pub ssid: Option<String>,
    pub password: Option<String>,
    pub mqtt_server: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: Option<Option<String>>,
    pub mqtt_pass: Option<Option<String>>,
    pub bitrate: Option<Bitrate>,
    pub can_id: Option<u32>,
    pub payload: Option<FramePayload>,
    pub can_mode: Option<CanMode>,
}

impl SettingsDelta {
    pub fn is_empty(&self) -> bool {
        *self == SettingsDelta::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bitrate_parse() {
        assert_eq!("250".parse::<Bitrate>().unwrap(), Bitrate::Kbps250);
        assert_eq!(Bitrate::Kbps250.bits_per_second(), 250_000);
        assert!("1000".parse::<Bitrate>().is_err());
        assert!("fast".parse::<Bitrate>().is_err());
    }

    #[test]
    fn test_can_mode_parse() {
        assert_eq!("Normal".parse::<CanMode>().unwrap(), CanMode::Normal);
        assert!(CanMode::Loopback.is_diagnostic());
        assert!(!CanMode::Normal.is_diagnostic());
        assert!("listen".parse::<CanMode>().is_err());
    }

    #[test]
    fn test_payload_hex() {
        let payload = FramePayload::parse_hex("de ad BE ef").unwrap();
        assert_eq!(payload.as_bytes(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(payload.to_string(), "DE AD BE EF");

        assert_eq!(FramePayload::parse_hex("0102").unwrap().len(), 2);
        assert!(FramePayload::parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_payload_hex_rejects_bad_input() {
        assert!(matches!(
            FramePayload::parse_hex("123"),
            Err(FieldError::InvalidHex { .. })
        ));
        assert!(matches!(
            FramePayload::parse_hex("zz"),
            Err(FieldError::InvalidHex { .. })
        ));
        assert!(matches!(
            FramePayload::parse_hex("01 02 03 04 05 06 07 08 09"),
            Err(FieldError::PayloadTooLong { len: 9, .. })
        ));
    }

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("100").unwrap(), 0x100);
        assert_eq!(parse_can_id("0x7DF").unwrap(), 0x7DF);
        assert_eq!(parse_can_id("18DAF100").unwrap(), 0x18DA_F100);
        assert!(parse_can_id("xyz").is_err());
        assert!(parse_can_id("").is_err());
        assert!(matches!(
            parse_can_id("20000000"),
            Err(FieldError::IdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("1884").unwrap(), 1884);
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("abc").is_err());
    }

    #[test]
    fn test_settings_document_layout() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["SSID"], "your_ssid");
        assert_eq!(json["MQTT_PORT"], 1883);
        assert_eq!(json["MQTT_USER"], serde_json::Value::Null);
        assert_eq!(json["bitrate"], "125");
        assert_eq!(json["can_id"], "100");
        assert_eq!(json["data_hex"], "12 34 56 78 9A BC DE F0");
        assert_eq!(json["can_mode"], "loopback");

        let back: Settings = serde_json::from_value(json).unwrap();
        assert_eq!(back, Settings::default());
    }

    #[test]
    fn test_changes_from() {
        let before = Settings::default();
        let mut after = before.clone();
        after.bitrate = Bitrate::Kbps250;
        after.can_mode = CanMode::Normal;

        let changes = after.changes_from(&before);
        assert!(changes.bus);
        assert!(!changes.wireless);
        assert!(!changes.broker);
        assert!(!changes.frame);

        assert!(!before.changes_from(&before).any());
    }
}
