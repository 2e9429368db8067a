//! CAN controller abstraction
//!
//! The bridge only needs a handful of controller primitives; everything
//! below them (SPI transceivers, SocketCAN netlink, error counters) belongs
//! to the implementation.
//!
//! - SocketCAN controller (Linux only, `socketcan` feature)
//! - Mock controller for testing

pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use mock::MockCanController;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::frame::CanFrame;
use crate::settings::{Bitrate, CanMode};

/// Oscillator feeding the CAN controller; bit timing is derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControllerClock {
    #[default]
    #[serde(rename = "8mhz")]
    Mhz8,
    #[serde(rename = "16mhz")]
    Mhz16,
    #[serde(rename = "20mhz")]
    Mhz20,
}

impl ControllerClock {
    pub fn hz(self) -> u32 {
        match self {
            ControllerClock::Mhz8 => 8_000_000,
            ControllerClock::Mhz16 => 16_000_000,
            ControllerClock::Mhz20 => 20_000_000,
        }
    }
}

/// Primitives the bridge needs from a CAN controller
///
/// Implementations must keep `read_message` non-blocking (or bounded):
/// `Ok(None)` means no frame was pending.
#[async_trait]
pub trait CanController: Send + Sync {
    /// Reset the controller into configuration state
    async fn reset(&mut self) -> Result<(), ControllerError>;

    /// Program bit timing for `bitrate` given the controller oscillator
    async fn set_bitrate(
        &mut self,
        bitrate: Bitrate,
        clock: ControllerClock,
    ) -> Result<(), ControllerError>;

    /// Enter the given operating mode
    async fn set_mode(&mut self, mode: CanMode) -> Result<(), ControllerError>;

    /// Queue one frame for transmission
    async fn send_message(&mut self, frame: &CanFrame) -> Result<(), ControllerError>;

    /// Read one pending frame, if any
    async fn read_message(&mut self) -> Result<Option<CanFrame>, ControllerError>;
}
