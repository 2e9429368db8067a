//! Bridge supervisor
//!
//! Owns the shared bridge state behind a single async mutex and runs the
//! bridge loop. The run flag lives outside the mutex so start/stop never
//! waits for a loop iteration.
//!
//! ```text
//!  HTTP handler ──apply_delta──┐
//!                              ▼
//!                     Mutex<BridgeCore> ◄──run_iteration── bridge loop
//!                     ├── ConfigStore
//!                     ├── ConnectivityManager
//!                     └── BusBridge
//! ```
//!
//! A settings update holds the mutex for its whole application, so the
//! loop never observes a half-applied configuration. The loop releases the
//! mutex during the self-test pause.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bridge::{BusBridge, BusOptions, PublishedRecord};
use crate::connectivity::{ConnectivityManager, LinkStatus, ReconnectAttempt, WirelessOutcome};
use crate::controller::{CanController, ControllerClock};
use crate::error::FieldError;
use crate::link::{BrokerConnector, BrokerOptions, WirelessCredentials, WirelessLink};
use crate::settings::{Settings, SettingsDelta};
use crate::store::ConfigStore;

/// Status shown after a settings update that applied cleanly
pub const APPLIED_MESSAGE: &str = "Config saved and applied!";

/// Timing of the bridge loop and the reconnect state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTiming {
    /// Minimum spacing between reconnect attempts
    pub reconnect_interval: Duration,
    pub wifi_connect_timeout: Duration,
    pub wifi_poll_interval: Duration,
    /// Bound on broker connect and publish
    pub broker_timeout: Duration,
    /// Pause after transmitting the self-test frame
    pub self_test_pause: Duration,
    /// Pause per iteration while stopped
    pub idle_pause: Duration,
    /// Pause when no frame was pending
    pub rx_poll_interval: Duration,
    /// Pause after a failed iteration
    pub error_pause: Duration,
}

impl Default for BridgeTiming {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(10),
            wifi_connect_timeout: Duration::from_secs(10),
            wifi_poll_interval: Duration::from_secs(1),
            broker_timeout: Duration::from_secs(5),
            self_test_pause: Duration::from_secs(1),
            idle_pause: Duration::from_secs(1),
            rx_poll_interval: Duration::from_millis(10),
            error_pause: Duration::from_secs(1),
        }
    }
}

/// Deployment options that are not user-editable settings
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub client_id: String,
    pub topic_prefix: String,
    pub controller_clock: ControllerClock,
    pub timing: BridgeTiming,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            client_id: "canbridge".to_string(),
            topic_prefix: "can/".to_string(),
            controller_clock: ControllerClock::default(),
            timing: BridgeTiming::default(),
        }
    }
}

/// State shared between the HTTP handlers and the bridge loop
pub struct BridgeCore {
    pub store: ConfigStore,
    pub connectivity: ConnectivityManager,
    pub bus: BusBridge,
}

/// Outcome of one step of a settings update
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum StepOutcome {
    #[default]
    Skipped,
    Applied,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// What [`BridgeSupervisor::apply_delta`] did, step by step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub persist: StepOutcome,
    pub wireless: StepOutcome,
    pub broker: StepOutcome,
    pub bus: StepOutcome,
    pub frame: StepOutcome,
    /// Fields that were dropped rather than applied
    pub rejected: Vec<FieldError>,
}

impl ApplyReport {
    /// True when no step failed; rejected fields do not count
    pub fn is_success(&self) -> bool {
        ![
            &self.persist,
            &self.wireless,
            &self.broker,
            &self.bus,
            &self.frame,
        ]
        .iter()
        .any(|step| step.is_failed())
    }

    /// Human-readable status for the configuration page
    pub fn status_message(&self) -> StatusMessage {
        let mut parts = Vec::new();
        if self.is_success() {
            parts.push(APPLIED_MESSAGE.to_string());
        }

        let steps = [
            ("Settings could not be saved", &self.persist),
            ("WiFi reconnect failed", &self.wireless),
            ("MQTT reconnect failed", &self.broker),
            ("CAN init failed", &self.bus),
            ("Test frame update failed", &self.frame),
        ];
        for (label, step) in steps {
            if let StepOutcome::Failed(reason) = step {
                parts.push(format!("{}: {}", label, reason));
            }
        }

        if !self.rejected.is_empty() {
            let fields: Vec<_> = self.rejected.iter().map(|e| e.field()).collect();
            parts.push(format!("Ignored invalid fields: {}", fields.join(", ")));
        }

        StatusMessage::new(parts.join(" "))
    }
}

/// Status line rendered on the configuration page; may be empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusMessage(String);

impl StatusMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time view of the bridge for the status page
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSnapshot {
    pub settings: Settings,
    pub running: bool,
    pub bus_initialized: bool,
    pub link: LinkStatus,
}

/// What one loop iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The bridge is stopped
    Idle,
    /// The controller is not initialized; no bus I/O was attempted
    BusUnavailable,
    NoFrame,
    Published(PublishedRecord),
    /// A transport error triggered the reconnect state machine
    TransportFailed {
        error: String,
        reconnect: ReconnectAttempt,
    },
    Failed(String),
}

/// Shared bridge state plus the bridge loop
pub struct BridgeSupervisor {
    core: Mutex<BridgeCore>,
    running: AtomicBool,
    client_id: String,
    timing: BridgeTiming,
}

impl BridgeSupervisor {
    /// The bridge starts stopped; frames flow only after [`Self::start`]
    pub fn new(core: BridgeCore, client_id: impl Into<String>, timing: BridgeTiming) -> Self {
        Self {
            core: Mutex::new(core),
            running: AtomicBool::new(false),
            client_id: client_id.into(),
            timing,
        }
    }

    /// Assemble the bridge from its collaborators and the loaded settings
    pub fn from_parts(
        store: ConfigStore,
        wireless: Box<dyn WirelessLink>,
        connector: Arc<dyn BrokerConnector>,
        controller: Box<dyn CanController>,
        options: BridgeOptions,
    ) -> Self {
        let settings = store.current().clone();
        let outgoing = settings.test_frame().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid test frame in settings, using default");
            Settings::default().test_frame().unwrap_or_default()
        });

        let connectivity = ConnectivityManager::new(
            wireless,
            connector,
            WirelessCredentials::from(&settings),
            BrokerOptions::from_settings(&options.client_id, &settings),
            options.timing,
        );
        let bus = BusBridge::new(
            controller,
            outgoing,
            BusOptions {
                clock: options.controller_clock,
                topic_prefix: options.topic_prefix,
            },
        );

        Self::new(
            BridgeCore {
                store,
                connectivity,
                bus,
            },
            options.client_id,
            options.timing,
        )
    }

    /// Lock the shared state
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, BridgeCore> {
        self.core.lock().await
    }

    /// Startup connection sequence: WiFi, then CAN, then MQTT
    ///
    /// Failures are logged and left to the reconnect state machine.
    pub async fn initialize(&self) {
        let mut core = self.core.lock().await;
        let settings = core.store.current().clone();

        core.connectivity
            .connect_wireless(WirelessCredentials::from(&settings))
            .await;
        if let Err(e) = core.bus.initialize(settings.bitrate, settings.can_mode).await {
            error!(error = %e, "CAN unavailable at startup");
        }
        let _ = core
            .connectivity
            .connect_broker(BrokerOptions::from_settings(&self.client_id, &settings))
            .await;
    }

    /// Enable bridging; idempotent
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Bridge started!");
        }
    }

    /// Disable bridging; idempotent
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Bridge stopped!");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn current_settings(&self) -> Settings {
        self.core.lock().await.store.current().clone()
    }

    pub async fn snapshot(&self) -> BridgeSnapshot {
        let core = self.core.lock().await;
        BridgeSnapshot {
            settings: core.store.current().clone(),
            running: self.is_running(),
            bus_initialized: core.bus.is_initialized(),
            link: core.connectivity.status().await,
        }
    }

    /// Merge, persist, and apply a settings delta
    ///
    /// Only subsystems whose settings actually changed are touched, in the
    /// order persist, WiFi, MQTT, CAN, test frame. A failing step is
    /// reported and the remaining steps still run.
    pub async fn apply_delta(&self, delta: SettingsDelta) -> ApplyReport {
        let mut core = self.core.lock().await;

        let outcome = core.store.replace(delta);
        let changes = outcome.settings.changes_from(&outcome.previous);
        let settings = outcome.settings;

        let mut report = ApplyReport {
            rejected: outcome.rejected,
            ..ApplyReport::default()
        };

        report.persist = match (&outcome.persist_error, changes.any()) {
            (Some(e), _) => StepOutcome::Failed(e.to_string()),
            (None, true) => StepOutcome::Applied,
            (None, false) => StepOutcome::Skipped,
        };

        if changes.wireless {
            info!(ssid = %settings.ssid, "WiFi config changed, reconnecting...");
            core.connectivity.disconnect_wireless().await;
            report.wireless = match core
                .connectivity
                .connect_wireless(WirelessCredentials::from(&settings))
                .await
            {
                WirelessOutcome::Connected => StepOutcome::Applied,
                WirelessOutcome::TimedOut => StepOutcome::Failed("connection timed out".to_string()),
                WirelessOutcome::Failed(e) => StepOutcome::Failed(e.to_string()),
            };
        }

        if changes.broker {
            info!(host = %settings.mqtt_server, port = settings.mqtt_port, "MQTT config changed, reconnecting...");
            report.broker = match core
                .connectivity
                .connect_broker(BrokerOptions::from_settings(&self.client_id, &settings))
                .await
            {
                Ok(()) => StepOutcome::Applied,
                Err(e) => StepOutcome::Failed(e.to_string()),
            };
        }

        if changes.bus {
            info!(kbps = settings.bitrate.kbps(), mode = %settings.can_mode, "CAN config changed, reinitializing...");
            report.bus = match core.bus.initialize(settings.bitrate, settings.can_mode).await {
                Ok(()) => StepOutcome::Applied,
                Err(e) => StepOutcome::Failed(e.to_string()),
            };
        }

        if changes.frame {
            report.frame = match settings.test_frame() {
                Ok(frame) => {
                    core.bus.set_outgoing_frame(frame);
                    StepOutcome::Applied
                }
                Err(e) => StepOutcome::Failed(e.to_string()),
            };
        }

        if report.is_success() {
            info!("{}", APPLIED_MESSAGE);
        } else {
            warn!(?report, "Settings applied with failures");
        }
        report
    }

    /// One pass of the bridge loop, without the trailing pause
    pub async fn run_iteration(&self) -> IterationOutcome {
        if !self.is_running() {
            return IterationOutcome::Idle;
        }

        let self_test = {
            let mut core = self.core.lock().await;
            match core.bus.mode() {
                None => return IterationOutcome::BusUnavailable,
                Some(mode) if mode.is_diagnostic() => {
                    // Logged by the bus; a failed self-test does not stop reception
                    let _ = core.bus.transmit_test_frame().await;
                    true
                }
                Some(_) => false,
            }
        };

        if self_test {
            tokio::time::sleep(self.timing.self_test_pause).await;
        }

        let mut core = self.core.lock().await;
        let BridgeCore {
            bus, connectivity, ..
        } = &mut *core;

        match bus.read_and_publish(connectivity).await {
            Ok(Some(published)) => IterationOutcome::Published(published),
            Ok(None) => IterationOutcome::NoFrame,
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Loop error");
                let reconnect = connectivity.reconnect_if_due(Instant::now()).await;
                IterationOutcome::TransportFailed {
                    error: e.to_string(),
                    reconnect,
                }
            }
            Err(e) => {
                error!(error = %e, "Unexpected error");
                IterationOutcome::Failed(e.to_string())
            }
        }
    }

    fn pause_after(&self, outcome: &IterationOutcome) -> Duration {
        match outcome {
            IterationOutcome::Idle => self.timing.idle_pause,
            IterationOutcome::Published(_) => Duration::ZERO,
            IterationOutcome::NoFrame => self.timing.rx_poll_interval,
            IterationOutcome::BusUnavailable
            | IterationOutcome::TransportFailed { .. }
            | IterationOutcome::Failed(_) => self.timing.error_pause,
        }
    }

    /// Run the bridge loop until `shutdown` flips to true or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Bridge loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.run_iteration() => outcome,
            };
            if outcome == IterationOutcome::BusUnavailable {
                debug!("CAN not initialized, skipping bus I/O");
            }

            let pause = self.pause_after(&outcome);
            if !pause.is_zero() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        info!("Bridge loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mock::ControllerCall;
    use crate::controller::MockCanController;
    use crate::link::{MockBroker, MockWirelessLink};
    use crate::settings::{Bitrate, CanMode, FramePayload};
    use crate::store::{MemoryStorage, SettingsStorage};
    use pretty_assertions::assert_eq;

    struct Harness {
        supervisor: Arc<BridgeSupervisor>,
        storage: Arc<MemoryStorage>,
        wireless: MockWirelessLink,
        broker: MockBroker,
        controller: MockCanController,
    }

    async fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let wireless = MockWirelessLink::new();
        let broker = MockBroker::new();
        let controller = MockCanController::new();

        let supervisor = BridgeSupervisor::from_parts(
            ConfigStore::load(storage.clone() as Arc<dyn SettingsStorage>),
            Box::new(wireless.clone()),
            Arc::new(broker.clone()),
            Box::new(controller.clone()),
            BridgeOptions::default(),
        );
        supervisor.initialize().await;
        controller.clear_calls();

        Harness {
            supervisor: Arc::new(supervisor),
            storage,
            wireless,
            broker,
            controller,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_connects_everything() {
        let h = harness().await;
        let snapshot = h.supervisor.snapshot().await;

        // Bridging waits for an explicit start
        assert!(!snapshot.running);
        assert!(snapshot.bus_initialized);
        assert_eq!(snapshot.link.wireless, crate::ConnectionState::Connected);
        assert_eq!(snapshot.link.broker, crate::ConnectionState::Connected);
        assert_eq!(h.wireless.connect_calls().len(), 1);
        assert_eq!(h.broker.sessions()[0].client_id, "canbridge");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_delta_reports_success_without_side_effects() {
        let h = harness().await;
        let before = h.supervisor.current_settings().await;

        let report = h.supervisor.apply_delta(SettingsDelta::default()).await;

        assert!(report.is_success());
        assert_eq!(report.status_message().as_str(), APPLIED_MESSAGE);
        assert_eq!(report.persist, StepOutcome::Skipped);
        assert_eq!(h.supervisor.current_settings().await, before);
        assert_eq!(h.storage.save_count(), 0);
        assert!(h.controller.calls().is_empty());
        assert_eq!(h.broker.sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_change_reinitializes_without_reconnects() {
        let h = harness().await;

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                bitrate: Some(Bitrate::Kbps250),
                can_mode: Some(CanMode::Normal),
                ..Default::default()
            })
            .await;

        assert_eq!(report.bus, StepOutcome::Applied);
        assert_eq!(report.wireless, StepOutcome::Skipped);
        assert_eq!(report.broker, StepOutcome::Skipped);
        assert_eq!(
            h.controller.calls(),
            vec![
                ControllerCall::Reset,
                ControllerCall::SetBitrate(Bitrate::Kbps250, ControllerClock::Mhz8),
                ControllerCall::SetMode(CanMode::Normal),
            ]
        );
        assert_eq!(h.wireless.connect_calls().len(), 1);
        assert_eq!(h.broker.sessions().len(), 1);

        let persisted = h.storage.document().unwrap();
        assert!(persisted.contains(r#""bitrate":"250""#));
        assert!(persisted.contains(r#""can_mode":"normal""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_change_reconnects_broker_only() {
        let h = harness().await;

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                mqtt_server: Some("10.0.0.5".to_string()),
                mqtt_port: Some(1884),
                ..Default::default()
            })
            .await;

        assert!(report.is_success());
        assert_eq!(report.broker, StepOutcome::Applied);
        let sessions = h.broker.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].host, "10.0.0.5");
        assert_eq!(sessions[1].port, 1884);
        assert_eq!(h.wireless.disconnect_count(), 0);
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wireless_change_reconnects_wifi() {
        let h = harness().await;

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                ssid: Some("garage".to_string()),
                password: Some("secret".to_string()),
                ..Default::default()
            })
            .await;

        assert_eq!(report.wireless, StepOutcome::Applied);
        assert_eq!(h.wireless.disconnect_count(), 1);
        assert_eq!(h.wireless.connect_calls().last().unwrap().ssid, "garage");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_value_does_not_reconnect() {
        let h = harness().await;

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                ssid: Some("your_ssid".to_string()),
                mqtt_port: Some(1883),
                ..Default::default()
            })
            .await;

        assert_eq!(report.wireless, StepOutcome::Skipped);
        assert_eq!(report.broker, StepOutcome::Skipped);
        assert_eq!(h.wireless.disconnect_count(), 0);
        assert_eq!(h.broker.sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_change_updates_outgoing_frame_in_place() {
        let h = harness().await;

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                can_id: Some(0x7DF),
                payload: Some(FramePayload::parse_hex("02 01 0C").unwrap()),
                ..Default::default()
            })
            .await;

        assert_eq!(report.frame, StepOutcome::Applied);
        assert!(h.controller.calls().is_empty());

        let core = h.supervisor.lock().await;
        let frame = core.bus.outgoing_frame();
        assert_eq!(frame.id(), 0x7DF);
        assert_eq!(frame.data(), &[0x02, 0x01, 0x0C]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_does_not_stop_later_steps() {
        let h = harness().await;
        h.broker.set_fail_connect(true);

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                mqtt_server: Some("down".to_string()),
                can_id: Some(0x200),
                ..Default::default()
            })
            .await;

        assert!(!report.is_success());
        assert!(report.broker.is_failed());
        assert_eq!(report.frame, StepOutcome::Applied);
        assert!(report
            .status_message()
            .as_str()
            .starts_with("MQTT reconnect failed"));
        assert_eq!(h.supervisor.current_settings().await.mqtt_server, "down");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_failure_is_reported() {
        let h = harness().await;
        h.supervisor.start();
        h.controller.set_fail_bitrate(true);

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                bitrate: Some(Bitrate::Kbps500),
                ..Default::default()
            })
            .await;

        assert!(report.bus.is_failed());
        assert!(!h.supervisor.snapshot().await.bus_initialized);
        assert_eq!(
            h.supervisor.run_iteration().await,
            IterationOutcome::BusUnavailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_still_applies() {
        let h = harness().await;
        h.storage.set_fail_saves(true);

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                can_mode: Some(CanMode::Normal),
                ..Default::default()
            })
            .await;

        assert!(report.persist.is_failed());
        assert_eq!(report.bus, StepOutcome::Applied);
        assert!(report
            .status_message()
            .as_str()
            .starts_with("Settings could not be saved"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fields_are_listed() {
        let h = harness().await;

        let report = h
            .supervisor
            .apply_delta(SettingsDelta {
                mqtt_port: Some(0),
                can_id: Some(0x123),
                ..Default::default()
            })
            .await;

        assert!(report.is_success());
        assert_eq!(
            report.status_message().as_str(),
            "Config saved and applied! Ignored invalid fields: mqtt_port"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let h = harness().await;
        assert!(!h.supervisor.is_running());
        assert_eq!(h.supervisor.run_iteration().await, IterationOutcome::Idle);
        assert!(h.controller.calls().is_empty());

        h.supervisor.start();
        h.supervisor.start();
        assert!(h.supervisor.is_running());

        h.supervisor.stop();
        h.supervisor.stop();
        assert!(!h.supervisor.is_running());

        h.supervisor.start();
        h.supervisor.start();
        assert!(h.supervisor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_iteration_does_no_bus_io() {
        let h = harness().await;
        h.supervisor.stop();

        assert_eq!(h.supervisor.run_iteration().await, IterationOutcome::Idle);
        assert!(h.controller.calls().is_empty());
        assert!(h.broker.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_iteration_publishes_self_test_frame() {
        let h = harness().await;
        h.supervisor.start();

        let outcome = h.supervisor.run_iteration().await;
        let IterationOutcome::Published(published) = outcome else {
            panic!("expected a published record, got {:?}", outcome);
        };
        assert_eq!(published.topic, "can/0x100");
        assert_eq!(
            published.record.data,
            vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]
        );
        assert_eq!(h.controller.sent_frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_mode_does_not_transmit() {
        let h = harness().await;
        h.supervisor.start();
        h.supervisor
            .apply_delta(SettingsDelta {
                can_mode: Some(CanMode::Normal),
                ..Default::default()
            })
            .await;

        assert_eq!(h.supervisor.run_iteration().await, IterationOutcome::NoFrame);
        assert!(h.controller.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_triggers_reconnect() {
        let h = harness().await;
        h.supervisor.start();
        h.broker.close_transport();

        let outcome = h.supervisor.run_iteration().await;
        let IterationOutcome::TransportFailed { reconnect, .. } = outcome else {
            panic!("expected a transport failure, got {:?}", outcome);
        };
        assert!(reconnect.was_attempted());
        assert_eq!(h.broker.sessions().len(), 2);

        // A second failure within the reconnect interval is not retried
        h.broker.close_transport();
        let outcome = h.supervisor.run_iteration().await;
        assert!(matches!(
            outcome,
            IterationOutcome::TransportFailed {
                reconnect: ReconnectAttempt::Skipped,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness().await;
        h.supervisor.start();
        let (tx, rx) = watch::channel(false);

        let supervisor = h.supervisor.clone();
        let handle = tokio::spawn(async move { supervisor.run(rx).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(!h.broker.published().is_empty());
    }
}
