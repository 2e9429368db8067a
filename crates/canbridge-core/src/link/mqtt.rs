//! MQTT broker sessions over rumqttc
//!
//! The rumqttc event loop has to be polled for anything to move, so each
//! session owns a driver task. The driver clears the session's connected
//! flag when the transport fails; the session never reconnects on its own,
//! that is left to the connectivity manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrokerConnector, BrokerOptions, BrokerSession};
use crate::error::LinkError;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Opens rumqttc sessions
#[derive(Debug, Clone)]
pub struct MqttConnector {
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl MqttConnector {
    pub fn new(keep_alive: Duration, connect_timeout: Duration) -> Self {
        Self {
            keep_alive,
            connect_timeout,
        }
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, options: &BrokerOptions) -> Result<Box<dyn BrokerSession>, LinkError> {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(self.keep_alive);
        mqtt.set_clean_session(true);
        if let Some(user) = &options.username {
            mqtt.set_credentials(user, options.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(LinkError::ConnectionFailed(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(LinkError::ConnectionFailed(e.to_string())),
                }
            }
        };

        tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| {
                LinkError::Timeout(format!(
                    "no CONNACK from {}:{} within {:?}",
                    options.host, options.port, self.connect_timeout
                ))
            })??;

        info!(host = %options.host, port = options.port, "Connected to MQTT broker");

        let connected = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive(eventloop, connected.clone()));

        Ok(Box::new(MqttSession {
            client,
            connected,
            driver,
        }))
    }
}

/// Poll the event loop until the transport closes
async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT session closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection lost");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

struct MqttSession {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::ConnectionClosed);
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| LinkError::PublishFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let result = if self.is_connected() {
            self.client
                .disconnect()
                .await
                .map_err(|e| LinkError::PublishFailed(e.to_string()))
        } else {
            Ok(())
        };

        // Give the driver a moment to flush DISCONNECT
        if !self.driver.is_finished()
            && tokio::time::timeout(Duration::from_secs(1), &mut self.driver)
                .await
                .is_err()
        {
            self.driver.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        result
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
