//! Mock wireless link and broker for testing
//!
//! Both mocks are cheap to clone and share state, so tests keep a handle
//! while the connectivity manager owns another.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BrokerConnector, BrokerOptions, BrokerSession, WirelessCredentials, WirelessLink};
use crate::error::LinkError;

// =============================================================================
// Wireless
// =============================================================================

struct WirelessState {
    connected: bool,
    reachable: bool,
    connects: Vec<WirelessCredentials>,
    disconnects: usize,
}

/// Mock wireless link
///
/// `connect` associates immediately when the access point is reachable and
/// never completes otherwise.
#[derive(Clone)]
pub struct MockWirelessLink {
    state: Arc<Mutex<WirelessState>>,
}

impl Default for MockWirelessLink {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(WirelessState {
                connected: false,
                reachable: true,
                connects: Vec::new(),
                disconnects: 0,
            })),
        }
    }
}

impl MockWirelessLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out associated
    pub fn connected() -> Self {
        let link = Self::default();
        link.state.lock().connected = true;
        link
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Simulate the access point dropping us
    pub fn drop_connection(&self) {
        self.state.lock().connected = false;
    }

    /// Credentials passed to every `connect` call
    pub fn connect_calls(&self) -> Vec<WirelessCredentials> {
        self.state.lock().connects.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }
}

#[async_trait]
impl WirelessLink for MockWirelessLink {
    async fn connect(&mut self, credentials: &WirelessCredentials) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.connects.push(credentials.clone());
        state.connected = state.reachable;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn local_address(&self) -> Option<IpAddr> {
        self.state
            .lock()
            .connected
            .then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 2)))
    }
}

// =============================================================================
// Broker
// =============================================================================

#[derive(Default)]
struct BrokerState {
    /// Incremented per session; older sessions report closed
    generation: u64,
    transport_closed: bool,
    fail_connect: bool,
    fail_publish: bool,
    sessions: Vec<BrokerOptions>,
    disconnects: usize,
    published: Vec<(String, Vec<u8>)>,
}

/// Mock broker acting as a [`BrokerConnector`]
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Simulate the broker closing the current session's transport
    pub fn close_transport(&self) {
        self.state.lock().transport_closed = true;
    }

    /// Options of every session opened, oldest first
    pub fn sessions(&self) -> Vec<BrokerOptions> {
        self.state.lock().sessions.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Messages published so far as (topic, payload)
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().published.clone()
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self, options: &BrokerOptions) -> Result<Box<dyn BrokerSession>, LinkError> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(LinkError::ConnectionFailed(format!(
                "{}:{} refused connection",
                options.host, options.port
            )));
        }
        state.generation += 1;
        state.transport_closed = false;
        state.sessions.push(options.clone());

        Ok(Box::new(MockBrokerSession {
            state: self.state.clone(),
            generation: state.generation,
        }))
    }
}

struct MockBrokerSession {
    state: Arc<Mutex<BrokerState>>,
    generation: u64,
}

impl MockBrokerSession {
    fn alive(state: &BrokerState, generation: u64) -> bool {
        state.generation == generation && !state.transport_closed
    }
}

#[async_trait]
impl BrokerSession for MockBrokerSession {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        if !Self::alive(&state, self.generation) {
            return Err(LinkError::ConnectionClosed);
        }
        if state.fail_publish {
            return Err(LinkError::PublishFailed("mock publish failure".to_string()));
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        Self::alive(&self.state.lock(), self.generation)
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        if state.generation == self.generation {
            state.transport_closed = true;
        }
        Ok(())
    }
}
