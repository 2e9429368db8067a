//! Settings persistence
//!
//! [`ConfigStore`] owns the current [`Settings`] and writes them through a
//! [`SettingsStorage`] after every accepted change. Loading never fails:
//! a missing document yields defaults, and each malformed field falls back
//! to its default individually.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{FieldError, StoreError};
use crate::settings::{parse_can_id, FramePayload, Settings, SettingsDelta, MAX_CAN_ID};

/// Backing storage for the flat settings document
pub trait SettingsStorage: Send + Sync {
    /// Read the persisted document, `None` if nothing has been saved yet
    fn load(&self) -> Result<Option<String>, StoreError>;

    /// Durably replace the persisted document
    fn save(&self, document: &str) -> Result<(), StoreError>;
}

/// JSON file storage with write-to-temp-then-rename replacement
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SettingsStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(document.as_bytes())?;
            file.sync_all()?;
        }
        // A crash before the rename leaves the previous document intact
        fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), "Settings document written");
        Ok(())
    }
}

/// In-memory storage, used by tests and when running without a settings file
#[derive(Default)]
pub struct MemoryStorage {
    document: Mutex<Option<String>>,
    fail_saves: AtomicBool,
    saves: Mutex<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
            ..Self::default()
        }
    }

    /// Current persisted document
    pub fn document(&self) -> Option<String> {
        self.document.lock().clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    /// Make subsequent saves fail (simulates a full or read-only filesystem)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl SettingsStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.document.lock().clone())
    }

    fn save(&self, document: &str) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "storage is read-only",
            )));
        }
        *self.document.lock() = Some(document.to_string());
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Result of [`ConfigStore::replace`]
#[derive(Debug)]
pub struct ReplaceOutcome {
    /// Settings before the delta was applied
    pub previous: Settings,
    /// Settings after the delta was applied (in memory, even if persisting failed)
    pub settings: Settings,
    /// Fields dropped by validation
    pub rejected: Vec<FieldError>,
    /// Set when the merged settings could not be written
    pub persist_error: Option<StoreError>,
}

/// Owner of the current settings
pub struct ConfigStore {
    storage: Arc<dyn SettingsStorage>,
    settings: Settings,
}

impl ConfigStore {
    /// Load settings from storage, defaulting anything missing or malformed
    pub fn load(storage: Arc<dyn SettingsStorage>) -> Self {
        let settings = match storage.load() {
            Ok(Some(document)) => settings_from_document(&document),
            Ok(None) => {
                info!("No persisted settings, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read settings, using defaults");
                Settings::default()
            }
        };

        Self { storage, settings }
    }

    /// Current settings
    pub fn current(&self) -> &Settings {
        &self.settings
    }

    /// Validate and merge a delta, then persist the result
    ///
    /// Invalid fields are dropped individually; the rest of the delta still
    /// applies. Storage is only written when the merged settings differ.
    pub fn replace(&mut self, delta: SettingsDelta) -> ReplaceOutcome {
        let previous = self.settings.clone();
        let (next, rejected) = merge(&previous, delta);

        for err in &rejected {
            warn!(field = err.field(), error = %err, "Rejected settings field");
        }

        let mut persist_error = None;
        if next != previous {
            self.settings = next.clone();
            if let Err(e) = self.persist() {
                warn!(error = %e, "Failed to persist settings");
                persist_error = Some(e);
            } else {
                info!("Settings updated and persisted");
            }
        }

        ReplaceOutcome {
            previous,
            settings: next,
            rejected,
            persist_error,
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let document = serde_json::to_string(&self.settings)?;
        self.storage.save(&document)
    }
}

fn merge(current: &Settings, delta: SettingsDelta) -> (Settings, Vec<FieldError>) {
    let mut next = current.clone();
    let mut rejected = Vec::new();

    if let Some(ssid) = delta.ssid {
        if ssid.trim().is_empty() {
            rejected.push(FieldError::Empty { field: "ssid" });
        } else {
            next.ssid = ssid;
        }
    }
    if let Some(password) = delta.password {
        next.password = password;
    }
    if let Some(server) = delta.mqtt_server {
        if server.trim().is_empty() {
            rejected.push(FieldError::Empty {
                field: "mqtt_server",
            });
        } else {
            next.mqtt_server = server;
        }
    }
    if let Some(port) = delta.mqtt_port {
        if port == 0 {
            rejected.push(FieldError::InvalidPort {
                field: "mqtt_port",
                value: port.to_string(),
            });
        } else {
            next.mqtt_port = port;
        }
    }
    if let Some(user) = delta.mqtt_user {
        next.mqtt_user = user.filter(|u| !u.is_empty());
    }
    if let Some(pass) = delta.mqtt_pass {
        next.mqtt_pass = pass.filter(|p| !p.is_empty());
    }
    if let Some(bitrate) = delta.bitrate {
        next.bitrate = bitrate;
    }
    if let Some(id) = delta.can_id {
        if id > MAX_CAN_ID {
            rejected.push(FieldError::IdOutOfRange {
                field: "can_id",
                id,
            });
        } else {
            next.can_id = id;
        }
    }
    if let Some(payload) = delta.payload {
        next.payload = payload;
    }
    if let Some(mode) = delta.can_mode {
        next.can_mode = mode;
    }

    (next, rejected)
}

/// Decode a settings document field by field
fn settings_from_document(document: &str) -> Settings {
    let map: Map<String, Value> = match serde_json::from_str(document) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "Malformed settings document, using defaults");
            return Settings::default();
        }
    };

    let defaults = Settings::default();
    Settings {
        ssid: field(&map, "SSID", defaults.ssid),
        password: field(&map, "PASSWORD", defaults.password),
        mqtt_server: field(&map, "MQTT_SERVER", defaults.mqtt_server),
        mqtt_port: field_with(&map, "MQTT_PORT", defaults.mqtt_port, |v| {
            match serde_json::from_value::<u16>(v.clone()) {
                Ok(0) => Err("port must be non-zero".to_string()),
                Ok(port) => Ok(port),
                Err(e) => Err(e.to_string()),
            }
        }),
        mqtt_user: field::<Option<String>>(&map, "MQTT_USER", defaults.mqtt_user)
            .filter(|u| !u.is_empty()),
        mqtt_pass: field::<Option<String>>(&map, "MQTT_PASS", defaults.mqtt_pass)
            .filter(|p| !p.is_empty()),
        bitrate: field(&map, "bitrate", defaults.bitrate),
        can_id: field_with(&map, "can_id", defaults.can_id, |v| {
            let text = v.as_str().ok_or_else(|| "expected hex string".to_string())?;
            parse_can_id(text).map_err(|e| e.to_string())
        }),
        payload: field_with(&map, "data_hex", defaults.payload, |v| {
            let text = v.as_str().ok_or_else(|| "expected hex string".to_string())?;
            FramePayload::parse_hex(text).map_err(|e| e.to_string())
        }),
        can_mode: field(&map, "can_mode", defaults.can_mode),
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, default: T) -> T {
    field_with(map, key, default, |v| {
        serde_json::from_value(v.clone()).map_err(|e| e.to_string())
    })
}

fn field_with<T>(
    map: &Map<String, Value>,
    key: &str,
    default: T,
    parse: impl FnOnce(&Value) -> Result<T, String>,
) -> T {
    match map.get(key) {
        None => default,
        Some(value) => parse(value).unwrap_or_else(|error| {
            warn!(key, %error, "Invalid settings field, using default");
            default
        }),
    }
}
