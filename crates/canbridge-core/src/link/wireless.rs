//! Wireless link implementations
//!
//! [`NmcliWireless`] drives NetworkManager through its command line client.
//! Every invocation is bounded by a timeout and killed if it overruns.
//! [`StaticLink`] is for deployments on wired or pre-provisioned networks.

use std::net::IpAddr;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{WirelessCredentials, WirelessLink};
use crate::error::LinkError;

const NMCLI: &str = "nmcli";

/// NetworkManager-backed wireless link
pub struct NmcliWireless {
    interface: String,
    command_timeout: Duration,
}

impl NmcliWireless {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            command_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn nmcli(&self, args: &[&str]) -> Result<Output, LinkError> {
        let mut command = Command::new(NMCLI);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| LinkError::Timeout(format!("{} {}", NMCLI, args.join(" "))))?
            .map_err(|e| LinkError::Unsupported(format!("cannot run {}: {}", NMCLI, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LinkError::ConnectionFailed(stderr.trim().to_string()));
        }
        Ok(output)
    }
}

/// Find the state column for `interface` in `nmcli -t -f DEVICE,STATE device`
fn device_state<'a>(listing: &'a str, interface: &str) -> Option<&'a str> {
    listing.lines().find_map(|line| {
        let (device, state) = line.split_once(':')?;
        (device == interface).then_some(state)
    })
}

/// Parse the first `IP4.ADDRESS` value (`192.168.1.20/24`)
fn first_address(listing: &str) -> Option<IpAddr> {
    listing
        .lines()
        .filter_map(|line| line.split('|').next())
        .find_map(|entry| entry.trim().split('/').next()?.parse().ok())
}

#[async_trait]
impl WirelessLink for NmcliWireless {
    async fn connect(&mut self, credentials: &WirelessCredentials) -> Result<(), LinkError> {
        // `--wait 0` returns once activation has started; the caller polls
        let mut args = vec![
            "--wait",
            "0",
            "device",
            "wifi",
            "connect",
            credentials.ssid.as_str(),
        ];
        if !credentials.password.is_empty() {
            args.extend(["password", credentials.password.as_str()]);
        }
        args.extend(["ifname", self.interface.as_str()]);

        info!(interface = %self.interface, ssid = %credentials.ssid, "Connecting to WiFi");
        self.nmcli(&args).await.map(|_| ())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        match self
            .nmcli(&["device", "disconnect", self.interface.as_str()])
            .await
        {
            Ok(_) => Ok(()),
            // Already disconnected
            Err(LinkError::ConnectionFailed(message)) => {
                debug!(interface = %self.interface, %message, "WiFi disconnect ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn is_connected(&self) -> bool {
        match self.nmcli(&["-t", "-f", "DEVICE,STATE", "device"]).await {
            Ok(output) => {
                let listing = String::from_utf8_lossy(&output.stdout);
                device_state(&listing, &self.interface) == Some("connected")
            }
            Err(e) => {
                warn!(interface = %self.interface, error = %e, "Cannot query WiFi state");
                false
            }
        }
    }

    async fn local_address(&self) -> Option<IpAddr> {
        let output = self
            .nmcli(&["-g", "IP4.ADDRESS", "device", "show", self.interface.as_str()])
            .await
            .ok()?;
        first_address(&String::from_utf8_lossy(&output.stdout))
    }
}

/// A link that is always up (wired Ethernet, externally managed WiFi)
#[derive(Debug, Clone, Default)]
pub struct StaticLink {
    address: Option<IpAddr>,
}

impl StaticLink {
    pub fn new(address: Option<IpAddr>) -> Self {
        Self { address }
    }
}

#[async_trait]
impl WirelessLink for StaticLink {
    async fn connect(&mut self, credentials: &WirelessCredentials) -> Result<(), LinkError> {
        debug!(ssid = %credentials.ssid, "Static link, ignoring WiFi credentials");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn local_address(&self) -> Option<IpAddr> {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_device_state() {
        let listing = "eth0:connected\nwlan0:disconnected\nlo:connected (externally)\n";
        assert_eq!(device_state(listing, "wlan0"), Some("disconnected"));
        assert_eq!(device_state(listing, "eth0"), Some("connected"));
        assert_eq!(device_state(listing, "wlan1"), None);
    }

    #[test]
    fn test_first_address() {
        assert_eq!(
            first_address("192.168.1.20/24\n"),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
        );
        assert_eq!(
            first_address("10.0.0.7/8 | 10.0.0.8/8\n"),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
        );
        assert_eq!(first_address(""), None);
    }

    #[tokio::test]
    async fn test_static_link_is_always_up() {
        let mut link = StaticLink::new(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        let credentials = WirelessCredentials {
            ssid: "ignored".to_string(),
            password: String::new(),
        };
        link.connect(&credentials).await.unwrap();
        link.disconnect().await.unwrap();
        assert!(link.is_connected().await);
        assert_eq!(
            link.local_address().await,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
    }
}
