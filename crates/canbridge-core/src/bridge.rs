//! Bus side of the bridge
//!
//! [`BusBridge`] owns the CAN controller and the outgoing test frame. It
//! (re)initializes the controller, transmits the test frame, and turns each
//! received frame into a [`TelemetryRecord`] published under
//! `<prefix>0x<id>`.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityManager;
use crate::controller::{CanController, ControllerClock};
use crate::error::{BridgeError, ControllerError};
use crate::frame::{topic_for, CanFrame, TelemetryRecord};
use crate::settings::{Bitrate, CanMode};

/// Source of capture timestamps, nanoseconds since the Unix epoch
pub type NanoClock = fn() -> i64;

/// Wall-clock capture time
pub fn wall_clock_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// A record that reached the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedRecord {
    pub topic: String,
    pub record: TelemetryRecord,
}

/// Bus configuration that is not part of the user-editable settings
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub clock: ControllerClock,
    pub topic_prefix: String,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            clock: ControllerClock::default(),
            topic_prefix: "can/".to_string(),
        }
    }
}

pub struct BusBridge {
    controller: Box<dyn CanController>,
    outgoing: CanFrame,
    options: BusOptions,
    /// Mode of the last successful initialization
    mode: Option<CanMode>,
    now_ns: NanoClock,
}

impl BusBridge {
    pub fn new(controller: Box<dyn CanController>, outgoing: CanFrame, options: BusOptions) -> Self {
        Self {
            controller,
            outgoing,
            options,
            mode: None,
            now_ns: wall_clock_ns,
        }
    }

    /// Replace the capture clock
    pub fn with_clock(mut self, now_ns: NanoClock) -> Self {
        self.now_ns = now_ns;
        self
    }

    /// Reset the controller, then program bitrate and mode
    ///
    /// On failure the bridge is left uninitialized and the loop skips bus
    /// I/O until the next successful initialization.
    pub async fn initialize(&mut self, bitrate: Bitrate, mode: CanMode) -> Result<(), ControllerError> {
        self.mode = None;

        let result = async {
            self.controller.reset().await?;
            self.controller.set_bitrate(bitrate, self.options.clock).await?;
            self.controller.set_mode(mode).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(kbps = bitrate.kbps(), %mode, "CAN initialized");
                self.mode = Some(mode);
                Ok(())
            }
            Err(e) => {
                warn!(kbps = bitrate.kbps(), %mode, error = %e, "CAN initialization failed");
                Err(e)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.mode.is_some()
    }

    /// Operating mode, if initialized
    pub fn mode(&self) -> Option<CanMode> {
        self.mode
    }

    pub fn outgoing_frame(&self) -> &CanFrame {
        &self.outgoing
    }

    pub fn set_outgoing_frame(&mut self, frame: CanFrame) {
        info!(%frame, "Test frame updated");
        self.outgoing = frame;
    }

    pub fn topic_prefix(&self) -> &str {
        &self.options.topic_prefix
    }

    /// Send the outgoing test frame once
    pub async fn transmit_test_frame(&mut self) -> Result<(), ControllerError> {
        if !self.is_initialized() {
            return Err(ControllerError::NotInitialized);
        }
        match self.controller.send_message(&self.outgoing).await {
            Ok(()) => {
                debug!(frame = %self.outgoing, "TX");
                Ok(())
            }
            Err(e) => {
                warn!(frame = %self.outgoing, code = ?e.code(), error = %e, "TX failed");
                Err(e)
            }
        }
    }

    /// Read at most one frame and publish it
    ///
    /// Returns `Ok(None)` when no frame was pending.
    pub async fn read_and_publish(
        &mut self,
        link: &mut ConnectivityManager,
    ) -> Result<Option<PublishedRecord>, BridgeError> {
        if !self.is_initialized() {
            return Err(ControllerError::NotInitialized.into());
        }

        let Some(frame) = self.controller.read_message().await? else {
            return Ok(None);
        };

        let record = TelemetryRecord::capture(&frame, (self.now_ns)());
        let topic = topic_for(&self.options.topic_prefix, frame.id());
        let payload = serde_json::to_vec(&record)?;

        link.publish(&topic, payload).await?;
        debug!(%topic, %frame, "Published frame");

        Ok(Some(PublishedRecord { topic, record }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::ControllerCall;
    use crate::controller::MockCanController;
    use crate::error::LinkError;
    use crate::link::{BrokerOptions, MockBroker, MockWirelessLink, WirelessCredentials};
    use crate::supervisor::BridgeTiming;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const FIXED_NS: i64 = 1_700_000_000_123_456_789;

    fn fixed_clock() -> i64 {
        FIXED_NS
    }

    fn bridge(controller: &MockCanController) -> BusBridge {
        let outgoing = CanFrame::new(0x100, &[0x12, 0x34]).unwrap();
        BusBridge::new(Box::new(controller.clone()), outgoing, BusOptions::default())
            .with_clock(fixed_clock)
    }

    async fn connected_link(broker: &MockBroker) -> ConnectivityManager {
        let options = BrokerOptions {
            client_id: "canbridge".to_string(),
            host: "10.0.0.2".to_string(),
            port: 1883,
            username: None,
            password: None,
        };
        let mut link = ConnectivityManager::new(
            Box::new(MockWirelessLink::connected()),
            Arc::new(broker.clone()),
            WirelessCredentials {
                ssid: "lab".to_string(),
                password: String::new(),
            },
            options.clone(),
            BridgeTiming::default(),
        );
        link.connect_broker(options).await.unwrap();
        link
    }

    #[tokio::test]
    async fn test_initialize_sequence() {
        let controller = MockCanController::new();
        let mut bus = bridge(&controller);
        assert!(!bus.is_initialized());

        bus.initialize(Bitrate::Kbps250, CanMode::Normal).await.unwrap();

        assert_eq!(
            controller.calls(),
            vec![
                ControllerCall::Reset,
                ControllerCall::SetBitrate(Bitrate::Kbps250, ControllerClock::Mhz8),
                ControllerCall::SetMode(CanMode::Normal),
            ]
        );
        assert_eq!(bus.mode(), Some(CanMode::Normal));
    }

    #[tokio::test]
    async fn test_initialize_failure_leaves_bus_uninitialized() {
        let controller = MockCanController::new();
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Loopback).await.unwrap();

        controller.set_fail_bitrate(true);
        let err = bus.initialize(Bitrate::Kbps500, CanMode::Loopback).await.unwrap_err();
        assert!(matches!(err, ControllerError::Bitrate { kbps: 500, .. }));
        assert!(!bus.is_initialized());
        assert_eq!(
            bus.transmit_test_frame().await,
            Err(ControllerError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_transmit_test_frame() {
        let controller = MockCanController::new();
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Loopback).await.unwrap();

        bus.transmit_test_frame().await.unwrap();
        assert_eq!(controller.sent_frames(), vec![*bus.outgoing_frame()]);

        controller.set_send_error(Some(2));
        let err = bus.transmit_test_frame().await.unwrap_err();
        assert_eq!(err.code(), Some(2));
    }

    #[tokio::test]
    async fn test_read_and_publish_frame() {
        let controller = MockCanController::new();
        let broker = MockBroker::new();
        let mut link = connected_link(&broker).await;
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Normal).await.unwrap();

        controller.inject_frame(CanFrame::new(0x123, &[1, 2, 3]).unwrap());
        let published = bus.read_and_publish(&mut link).await.unwrap().unwrap();

        assert_eq!(published.topic, "can/0x123");
        let sent = broker.published();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "can/0x123");

        let body: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"d0": 1, "d1": 2, "d2": 3, "time": FIXED_NS})
        );
    }

    #[tokio::test]
    async fn test_read_and_publish_empty_frame() {
        let controller = MockCanController::new();
        let broker = MockBroker::new();
        let mut link = connected_link(&broker).await;
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Normal).await.unwrap();

        controller.inject_frame(CanFrame::new(0x7FF, &[]).unwrap());
        bus.read_and_publish(&mut link).await.unwrap();

        let body: serde_json::Value = serde_json::from_slice(&broker.published()[0].1).unwrap();
        assert_eq!(body, serde_json::json!({"time": FIXED_NS}));
    }

    #[tokio::test]
    async fn test_read_with_nothing_pending() {
        let controller = MockCanController::new();
        let broker = MockBroker::new();
        let mut link = connected_link(&broker).await;
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Normal).await.unwrap();

        assert_eq!(bus.read_and_publish(&mut link).await.unwrap(), None);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_transport_error() {
        let controller = MockCanController::new();
        let broker = MockBroker::new();
        let mut link = connected_link(&broker).await;
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Normal).await.unwrap();

        broker.close_transport();
        controller.inject_frame(CanFrame::new(0x10, &[0xFF]).unwrap());
        let err = bus.read_and_publish(&mut link).await.unwrap_err();

        assert!(matches!(err, BridgeError::Link(LinkError::ConnectionClosed)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_loopback_echo_is_published() {
        let controller = MockCanController::new();
        let broker = MockBroker::new();
        let mut link = connected_link(&broker).await;
        let mut bus = bridge(&controller);
        bus.initialize(Bitrate::Kbps125, CanMode::Loopback).await.unwrap();

        bus.transmit_test_frame().await.unwrap();
        let published = bus.read_and_publish(&mut link).await.unwrap().unwrap();
        assert_eq!(published.topic, "can/0x100");
        assert_eq!(published.record.data, vec![0x12, 0x34]);
    }
}
