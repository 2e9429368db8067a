//! Request handling for the configuration page
//!
//! Every request resolves to a [`StatusMessage`]; the page itself is
//! rendered afterwards from a fresh snapshot, so it always shows the state
//! the request left behind.

use std::sync::Arc;

use axum::http::Method;
use canbridge_core::{
    parse_can_id, parse_port, BridgeSupervisor, FieldError, FramePayload, SettingsDelta,
    StatusMessage,
};
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::query::{decode_query_string, QueryParams};
use crate::render;

/// Configuration web server front end
pub struct ConfigServer {
    supervisor: Arc<BridgeSupervisor>,
}

impl ConfigServer {
    pub fn new(supervisor: Arc<BridgeSupervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<BridgeSupervisor> {
        &self.supervisor
    }

    /// Act on one request and produce the status line for the page
    ///
    /// `/start` and `/stop` toggle the bridge, `/config` applies the
    /// submitted settings, anything else only shows the page.
    pub async fn handle_request(
        &self,
        method: &Method,
        path: &str,
        raw_query: Option<&str>,
    ) -> StatusMessage {
        if *method != Method::GET {
            debug!(%method, path, "Ignoring non-GET request");
            return StatusMessage::empty();
        }

        match path {
            "/start" => {
                self.supervisor.start();
                StatusMessage::new("Bridge started!")
            }
            "/stop" => {
                self.supervisor.stop();
                StatusMessage::new("Bridge stopped!")
            }
            "/config" => {
                let params = decode_query_string(raw_query.unwrap_or_default());
                let (delta, ignored) = build_delta(&params);
                info!(fields = params.len(), "Config update requested");

                // Runs detached so a dropped request cannot stop an update
                // between persisting the settings and applying them
                let supervisor = self.supervisor.clone();
                let applying = tokio::spawn(async move { supervisor.apply_delta(delta).await });

                match applying.await {
                    Ok(mut report) => {
                        // Parse failures come first; they were caught before the merge
                        let mut rejected = ignored;
                        rejected.append(&mut report.rejected);
                        report.rejected = rejected;
                        report.status_message()
                    }
                    Err(e) => {
                        error!(error = %e, "Config update task failed");
                        StatusMessage::new(format!("Config update failed: {}", e))
                    }
                }
            }
            _ => StatusMessage::empty(),
        }
    }

    /// Render the status page for the current bridge state
    pub async fn render_page(&self, status: &StatusMessage) -> Result<String, ApiError> {
        let snapshot = self.supervisor.snapshot().await;
        render::status_page(&snapshot, status).map_err(ApiError::from)
    }
}

/// Map recognized query parameters onto a settings delta
///
/// Unknown keys are ignored. A value that does not parse drops only its own
/// field and is returned in the second element.
pub fn build_delta(params: &QueryParams) -> (SettingsDelta, Vec<FieldError>) {
    let mut delta = SettingsDelta::default();
    let mut ignored = Vec::new();

    fn keep<T>(result: Result<T, FieldError>, ignored: &mut Vec<FieldError>) -> Option<T> {
        result.map_err(|e| ignored.push(e)).ok()
    }

    for (key, value) in params.iter() {
        match key {
            "ssid" => delta.ssid = Some(value.to_string()),
            "password" => delta.password = Some(value.to_string()),
            "mqtt_server" => delta.mqtt_server = Some(value.trim().to_string()),
            "mqtt_port" => delta.mqtt_port = keep(parse_port(value), &mut ignored),
            "mqtt_user" => delta.mqtt_user = Some(Some(value.to_string())),
            "mqtt_pass" => delta.mqtt_pass = Some(Some(value.to_string())),
            "bitrate" => delta.bitrate = keep(value.parse(), &mut ignored),
            "can_id" => delta.can_id = keep(parse_can_id(value), &mut ignored),
            "data_hex" => delta.payload = keep(FramePayload::parse_hex(value), &mut ignored),
            "can_mode" => delta.can_mode = keep(value.parse(), &mut ignored),
            other => debug!(key = other, "Ignoring unknown config parameter"),
        }
    }

    (delta, ignored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canbridge_core::{Bitrate, CanMode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_delta_full_form() {
        let params = decode_query_string(
            "ssid=lab&password=pw&mqtt_server=10.0.0.2&mqtt_port=1884&mqtt_user=&mqtt_pass=\
             &bitrate=250&can_id=7DF&data_hex=02+01+0C&can_mode=normal",
        );
        let (delta, ignored) = build_delta(&params);

        assert!(ignored.is_empty());
        assert_eq!(
            delta,
            SettingsDelta {
                ssid: Some("lab".to_string()),
                password: Some("pw".to_string()),
                mqtt_server: Some("10.0.0.2".to_string()),
                mqtt_port: Some(1884),
                mqtt_user: Some(Some(String::new())),
                mqtt_pass: Some(Some(String::new())),
                bitrate: Some(Bitrate::Kbps250),
                can_id: Some(0x7DF),
                payload: Some(FramePayload::parse_hex("02 01 0C").unwrap()),
                can_mode: Some(CanMode::Normal),
            }
        );
    }

    #[test]
    fn test_build_delta_ignores_unknown_keys() {
        let (delta, ignored) = build_delta(&decode_query_string("color=blue&x=1"));
        assert!(delta.is_empty());
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_build_delta_drops_bad_fields_only() {
        let (delta, ignored) = build_delta(&decode_query_string(
            "data_hex=XYZ&can_id=0x123&mqtt_port=70000&bitrate=333&can_mode=listen",
        ));

        assert_eq!(delta.can_id, Some(0x123));
        assert_eq!(delta.payload, None);
        assert_eq!(delta.mqtt_port, None);
        assert_eq!(delta.bitrate, None);
        assert_eq!(delta.can_mode, None);

        let fields: Vec<_> = ignored.iter().map(|e| e.field()).collect();
        assert_eq!(fields, vec!["data_hex", "mqtt_port", "bitrate", "can_mode"]);
    }

    #[test]
    fn test_build_delta_rejects_oversized_payload() {
        let (delta, ignored) = build_delta(&decode_query_string("data_hex=00+11+22+33+44+55+66+77+88"));
        assert_eq!(delta.payload, None);
        assert!(matches!(
            ignored[0],
            FieldError::PayloadTooLong { len: 9, .. }
        ));
    }

    #[test]
    fn test_build_delta_odd_hex_digits() {
        let (_, ignored) = build_delta(&decode_query_string("data_hex=123"));
        assert!(matches!(ignored[0], FieldError::InvalidHex { .. }));
    }
}
