//! SocketCAN controller (Linux only)
//!
//! Uses a raw, non-blocking `CanSocket`. Loopback mode enables local echo
//! and reception of our own frames, so the self-test frame is read back
//! without external wiring. When `manage_interface` is set, bitrate changes
//! are applied over netlink (needs CAP_NET_ADMIN and a real controller;
//! virtual `vcan` interfaces have no bit timing).

use async_trait::async_trait;
use socketcan::{
    CanInterface, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, SocketOptions,
    StandardId,
};
use tracing::{debug, info, warn};

use super::{CanController, ControllerClock};
use crate::error::ControllerError;
use crate::frame::CanFrame;
use crate::settings::{Bitrate, CanMode};

/// CAN controller backed by a SocketCAN interface
pub struct SocketCanController {
    interface: String,
    manage_interface: bool,
    socket: Option<CanSocket>,
}

impl SocketCanController {
    pub fn new(interface: impl Into<String>, manage_interface: bool) -> Self {
        Self {
            interface: interface.into(),
            manage_interface,
            socket: None,
        }
    }

    fn open_socket(&self) -> Result<CanSocket, std::io::Error> {
        let socket = CanSocket::open(&self.interface)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn to_socketcan_frame(frame: &CanFrame) -> Option<socketcan::CanFrame> {
        let id: Id = if frame.is_extended() {
            ExtendedId::new(frame.id())?.into()
        } else {
            StandardId::new(frame.id() as u16)?.into()
        };
        socketcan::CanFrame::new(id, frame.data())
    }

    fn from_socketcan_frame(frame: &socketcan::CanFrame) -> Option<CanFrame> {
        CanFrame::new(frame.raw_id(), frame.data()).ok()
    }
}

fn errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or(-1)
}

#[async_trait]
impl CanController for SocketCanController {
    async fn reset(&mut self) -> Result<(), ControllerError> {
        self.socket = None;

        if self.manage_interface {
            let iface = CanInterface::open(&self.interface)
                .map_err(|e| ControllerError::Reset(format!("{}: {}", self.interface, e)))?;
            iface
                .bring_down()
                .map_err(|e| ControllerError::Reset(format!("{}: {}", self.interface, e)))?;
        }

        debug!(interface = %self.interface, "SocketCAN controller reset");
        Ok(())
    }

    async fn set_bitrate(
        &mut self,
        bitrate: Bitrate,
        // The kernel driver derives timing from its own oscillator
        _clock: ControllerClock,
    ) -> Result<(), ControllerError> {
        if !self.manage_interface {
            debug!(
                interface = %self.interface,
                kbps = bitrate.kbps(),
                "Interface not managed, leaving bit timing to the system"
            );
            return Ok(());
        }

        let iface = CanInterface::open(&self.interface).map_err(|e| ControllerError::Bitrate {
            kbps: bitrate.kbps(),
            message: e.to_string(),
        })?;
        iface
            .set_bitrate(bitrate.bits_per_second(), None::<u32>)
            .map_err(|e| ControllerError::Bitrate {
                kbps: bitrate.kbps(),
                message: e.to_string(),
            })?;

        info!(interface = %self.interface, kbps = bitrate.kbps(), "CAN bitrate set");
        Ok(())
    }

    async fn set_mode(&mut self, mode: CanMode) -> Result<(), ControllerError> {
        let mode_error = |message: String| ControllerError::Mode {
            mode: mode.to_string(),
            message,
        };

        if self.manage_interface {
            let iface = CanInterface::open(&self.interface).map_err(|e| mode_error(e.to_string()))?;
            iface.bring_up().map_err(|e| mode_error(e.to_string()))?;
        }

        let socket = self.open_socket().map_err(|e| mode_error(e.to_string()))?;
        let loopback = mode == CanMode::Loopback;
        socket
            .set_loopback(loopback)
            .map_err(|e| mode_error(e.to_string()))?;
        socket
            .set_recv_own_msgs(loopback)
            .map_err(|e| mode_error(e.to_string()))?;

        self.socket = Some(socket);
        info!(interface = %self.interface, %mode, "CAN mode set");
        Ok(())
    }

    async fn send_message(&mut self, frame: &CanFrame) -> Result<(), ControllerError> {
        let socket = self.socket.as_ref().ok_or(ControllerError::NotInitialized)?;
        let raw = Self::to_socketcan_frame(frame).ok_or_else(|| ControllerError::Send {
            code: -1,
            message: format!("cannot encode frame {}", frame),
        })?;

        socket.write_frame(&raw).map_err(|e| ControllerError::Send {
            code: errno(&e),
            message: e.to_string(),
        })
    }

    async fn read_message(&mut self) -> Result<Option<CanFrame>, ControllerError> {
        let socket = self.socket.as_ref().ok_or(ControllerError::NotInitialized)?;

        match socket.read_frame() {
            Ok(frame) if frame.is_error_frame() => {
                warn!(interface = %self.interface, "CAN error frame received");
                Ok(None)
            }
            Ok(frame) => Ok(Self::from_socketcan_frame(&frame)),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ControllerError::Read {
                code: errno(&e),
                message: e.to_string(),
            }),
        }
    }
}
