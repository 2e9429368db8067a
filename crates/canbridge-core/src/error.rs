//! Error types for the bridge core
//!
//! Each collaborator has its own error enum; [`BridgeError`] is what a loop
//! iteration reports, and knows whether the failure should trigger a
//! reconnect.

use thiserror::Error;

/// Wireless / broker link errors. All of these are transient: the reconnect
/// state machine recovers from them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Link not supported: {0}")]
    Unsupported(String),
}

/// CAN controller errors
///
/// `code` carries the controller-reported error code where one exists
/// (errno for SocketCAN, `ERROR_*` values for SPI controllers).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Cannot reset controller: {0}")]
    Reset(String),

    #[error("Cannot set bitrate {kbps} kbps: {message}")]
    Bitrate { kbps: u32, message: String },

    #[error("Cannot set {mode} mode: {message}")]
    Mode { mode: String, message: String },

    #[error("Send failed with error code {code}: {message}")]
    Send { code: i32, message: String },

    #[error("Read failed with error code {code}: {message}")]
    Read { code: i32, message: String },

    #[error("Controller not initialized")]
    NotInitialized,

    #[error("Controller unavailable: {0}")]
    Unavailable(String),
}

impl ControllerError {
    /// Controller-reported error code, if the failure carried one
    pub fn code(&self) -> Option<i32> {
        match self {
            ControllerError::Send { code, .. } | ControllerError::Read { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Settings persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// CAN frame construction errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {0} bytes (max 8)")]
    PayloadTooLong(usize),

    #[error("Identifier out of range: 0x{0:X}")]
    IdOutOfRange(u32),
}

/// A single settings field that failed to parse or validate
///
/// Validation failures only ever drop the offending field; the rest of the
/// delta still applies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("{field}: invalid hex '{value}'")]
    InvalidHex { field: &'static str, value: String },

    #[error("{field}: payload too long ({len} bytes, max 8)")]
    PayloadTooLong { field: &'static str, len: usize },

    #[error("{field}: identifier 0x{id:X} out of range")]
    IdOutOfRange { field: &'static str, id: u32 },

    #[error("{field}: invalid port '{value}'")]
    InvalidPort { field: &'static str, value: String },

    #[error("{field}: unsupported bitrate '{value}'")]
    UnsupportedBitrate { field: &'static str, value: String },

    #[error("{field}: unknown mode '{value}'")]
    UnknownMode { field: &'static str, value: String },

    #[error("{field}: must not be empty")]
    Empty { field: &'static str },
}

impl FieldError {
    /// Name of the rejected field
    pub fn field(&self) -> &'static str {
        match self {
            FieldError::InvalidHex { field, .. }
            | FieldError::PayloadTooLong { field, .. }
            | FieldError::IdOutOfRange { field, .. }
            | FieldError::InvalidPort { field, .. }
            | FieldError::UnsupportedBitrate { field, .. }
            | FieldError::UnknownMode { field, .. }
            | FieldError::Empty { field } => *field,
        }
    }
}

/// Error reported by one bridge loop iteration
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bus read failed
    #[error("Bus error: {0}")]
    Bus(#[from] ControllerError),

    /// Broker or wireless transport failed
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Telemetry record could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether this error should trigger the reconnect state machine
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BridgeError::Link(_) | BridgeError::Bus(ControllerError::Read { .. })
        )
    }
}
