//! Wireless and broker connectivity
//!
//! [`ConnectivityManager`] owns the wireless link and the current broker
//! session, remembers the parameters last used for each, and implements the
//! rate-limited reconnect state machine the bridge loop falls back on after
//! transport errors.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::link::{BrokerConnector, BrokerOptions, BrokerSession, WirelessCredentials, WirelessLink};
use crate::supervisor::BridgeTiming;

/// State of one link as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        };
        f.write_str(s)
    }
}

/// Result of a wireless connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WirelessOutcome {
    Connected,
    /// Association did not complete within the connect timeout
    TimedOut,
    Failed(LinkError),
}

impl WirelessOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, WirelessOutcome::Connected)
    }
}

/// What [`ConnectivityManager::reconnect_if_due`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectAttempt {
    /// The previous attempt was too recent
    Skipped,
    /// Each field is `None` when that link was already up
    Attempted {
        wireless: Option<WirelessOutcome>,
        broker: Option<Result<(), LinkError>>,
    },
}

impl ReconnectAttempt {
    pub fn was_attempted(&self) -> bool {
        matches!(self, ReconnectAttempt::Attempted { .. })
    }
}

/// Observed state of both links
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub wireless: ConnectionState,
    pub broker: ConnectionState,
    pub local_address: Option<IpAddr>,
}

/// Owner of the wireless link and broker session
pub struct ConnectivityManager {
    wireless: Box<dyn WirelessLink>,
    connector: Arc<dyn BrokerConnector>,
    session: Option<Box<dyn BrokerSession>>,
    credentials: WirelessCredentials,
    broker_options: BrokerOptions,
    wireless_state: ConnectionState,
    broker_state: ConnectionState,
    last_attempt: Option<Instant>,
    timing: BridgeTiming,
}

impl ConnectivityManager {
    pub fn new(
        wireless: Box<dyn WirelessLink>,
        connector: Arc<dyn BrokerConnector>,
        credentials: WirelessCredentials,
        broker_options: BrokerOptions,
        timing: BridgeTiming,
    ) -> Self {
        Self {
            wireless,
            connector,
            session: None,
            credentials,
            broker_options,
            wireless_state: ConnectionState::Disconnected,
            broker_state: ConnectionState::Disconnected,
            last_attempt: None,
            timing,
        }
    }

    /// Associate with the access point, polling until connected or timed out
    ///
    /// The credentials are remembered for later reconnects whether or not
    /// this attempt succeeds.
    pub async fn connect_wireless(&mut self, credentials: WirelessCredentials) -> WirelessOutcome {
        self.credentials = credentials;
        self.wireless_state = ConnectionState::Connecting;

        let deadline = Instant::now() + self.timing.wifi_connect_timeout;
        let started =
            tokio::time::timeout_at(deadline, self.wireless.connect(&self.credentials)).await;
        match started {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(ssid = %self.credentials.ssid, error = %e, "WiFi connect failed");
                self.wireless_state = ConnectionState::Disconnected;
                return WirelessOutcome::Failed(e);
            }
            Err(_) => {
                warn!(ssid = %self.credentials.ssid, "WiFi connection timeout");
                self.wireless_state = ConnectionState::Disconnected;
                return WirelessOutcome::TimedOut;
            }
        }

        loop {
            // Each status query is bounded by the same deadline as the attempt
            let connected = tokio::time::timeout_at(deadline, self.wireless.is_connected())
                .await
                .unwrap_or(false);
            if connected {
                self.wireless_state = ConnectionState::Connected;
                let address = self.wireless.local_address().await;
                info!(ssid = %self.credentials.ssid, address = ?address, "WiFi connected");
                return WirelessOutcome::Connected;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(ssid = %self.credentials.ssid, "WiFi connection timeout");
                self.wireless_state = ConnectionState::Disconnected;
                return WirelessOutcome::TimedOut;
            }
            debug!(ssid = %self.credentials.ssid, "Waiting for WiFi");
            tokio::time::sleep(self.timing.wifi_poll_interval.min(deadline - now)).await;
        }
    }

    pub async fn disconnect_wireless(&mut self) {
        if let Err(e) = self.wireless.disconnect().await {
            warn!(error = %e, "WiFi disconnect failed");
        }
        self.wireless_state = ConnectionState::Disconnected;
    }

    /// Replace the broker session with a new one built from `options`
    ///
    /// The previous session is closed first. The options are remembered for
    /// later reconnects whether or not this attempt succeeds.
    pub async fn connect_broker(&mut self, options: BrokerOptions) -> Result<(), LinkError> {
        self.broker_options = options;
        self.disconnect_broker().await;
        self.broker_state = ConnectionState::Connecting;

        let attempt = tokio::time::timeout(
            self.timing.broker_timeout,
            self.connector.connect(&self.broker_options),
        )
        .await
        .unwrap_or_else(|_| {
            Err(LinkError::Timeout(format!(
                "broker {}:{} did not answer",
                self.broker_options.host, self.broker_options.port
            )))
        });

        match attempt {
            Ok(session) => {
                info!(
                    host = %self.broker_options.host,
                    port = self.broker_options.port,
                    "MQTT connected"
                );
                self.session = Some(session);
                self.broker_state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!(
                    host = %self.broker_options.host,
                    port = self.broker_options.port,
                    error = %e,
                    "MQTT connection failed"
                );
                self.broker_state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    pub async fn disconnect_broker(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect().await {
                debug!(error = %e, "MQTT disconnect failed");
            }
        }
        self.broker_state = ConnectionState::Disconnected;
    }

    /// Publish on the current session, bounded by the broker timeout
    pub async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        let session = self.session.as_mut().ok_or(LinkError::NotConnected)?;
        let result = tokio::time::timeout(self.timing.broker_timeout, session.publish(topic, payload))
            .await
            .unwrap_or_else(|_| Err(LinkError::Timeout(format!("publish to {}", topic))));

        if result.is_err() && !session.is_connected() {
            self.broker_state = ConnectionState::Disconnected;
        }
        result
    }

    fn broker_alive(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Reconnect whichever links are down, at most once per reconnect interval
    ///
    /// The attempt time is recorded even when nothing needed reconnecting.
    pub async fn reconnect_if_due(&mut self, now: Instant) -> ReconnectAttempt {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.timing.reconnect_interval {
                debug!("Reconnect attempted recently, skipping");
                return ReconnectAttempt::Skipped;
            }
        }

        info!("Reconnecting...");
        let wireless = if self.wireless.is_connected().await {
            None
        } else {
            Some(self.connect_wireless(self.credentials.clone()).await)
        };
        let broker = if self.broker_alive() {
            None
        } else {
            Some(self.connect_broker(self.broker_options.clone()).await)
        };

        self.last_attempt = Some(now);
        ReconnectAttempt::Attempted { wireless, broker }
    }

    /// Observe the current state of both links
    pub async fn status(&self) -> LinkStatus {
        let wireless = if self.wireless.is_connected().await {
            ConnectionState::Connected
        } else if self.wireless_state == ConnectionState::Connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        };
        let broker = if self.broker_alive() {
            ConnectionState::Connected
        } else if self.broker_state == ConnectionState::Connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        };
        let local_address = if wireless == ConnectionState::Connected {
            self.wireless.local_address().await
        } else {
            None
        };

        LinkStatus {
            wireless,
            broker,
            local_address,
        }
    }

    pub fn credentials(&self) -> &WirelessCredentials {
        &self.credentials
    }

    pub fn broker_options(&self) -> &BrokerOptions {
        &self.broker_options
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }
}
