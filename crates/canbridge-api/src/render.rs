//! HTML status page

use std::fmt::{self, Write};

use canbridge_core::{BridgeSnapshot, ConnectionState, StatusMessage};
use canbridge_core::{Bitrate, CanMode};

const STYLE: &str = "body { font-family: Arial; margin: 10px; padding: 5px; }\n\
                     h1 { font-size: 20px; }\n\
                     input, select, button { margin: 5px; padding: 5px; }\n";

/// Escape text for use in element content and double-quoted attributes
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the status page with the configuration form
pub fn status_page(snapshot: &BridgeSnapshot, status: &StatusMessage) -> Result<String, fmt::Error> {
    let settings = &snapshot.settings;
    let link = &snapshot.link;
    let mut html = String::with_capacity(4096);

    let address = match link.local_address {
        Some(addr) => addr.to_string(),
        None => "Not connected".to_string(),
    };
    let broker = if link.broker == ConnectionState::Connected {
        "Connected"
    } else {
        "Disconnected"
    };
    let can = if snapshot.bus_initialized {
        "Initialized"
    } else {
        "Not initialized"
    };
    let bridge = if snapshot.running { "Running" } else { "Stopped" };

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str("<title>CAN MQTT Bridge Config</title>\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    write!(html, "<style>\n{}</style>\n", STYLE)?;
    html.push_str("</head>\n<body>\n");
    html.push_str("<h1>CAN to MQTT Bridge Configuration</h1>\n");

    html.push_str("<p><b>Status:</b><br>\n");
    writeln!(html, "IP Address: {}<br>", escape(&address))?;
    writeln!(html, "WiFi: {}<br>", link.wireless)?;
    writeln!(html, "MQTT: {}<br>", broker)?;
    writeln!(html, "CAN: {}<br>", can)?;
    writeln!(html, "Bridge: {}<br>", bridge)?;
    html.push_str("</p>\n");
    writeln!(html, "<p>{}</p>", escape(status.as_str()))?;

    html.push_str("<form method=\"GET\" action=\"/config\">\n");
    writeln!(
        html,
        "WiFi SSID: <input type=\"text\" name=\"ssid\" value=\"{}\" required><br>",
        escape(&settings.ssid)
    )?;
    writeln!(
        html,
        "WiFi Password: <input type=\"password\" name=\"password\" value=\"{}\"><br>",
        escape(&settings.password)
    )?;
    writeln!(
        html,
        "MQTT Server: <input type=\"text\" name=\"mqtt_server\" value=\"{}\"><br>",
        escape(&settings.mqtt_server)
    )?;
    writeln!(
        html,
        "MQTT Port: <input type=\"number\" name=\"mqtt_port\" value=\"{}\" min=\"1\" max=\"65535\"><br>",
        settings.mqtt_port
    )?;
    writeln!(
        html,
        "MQTT User: <input type=\"text\" name=\"mqtt_user\" value=\"{}\"><br>",
        escape(settings.mqtt_user.as_deref().unwrap_or_default())
    )?;
    writeln!(
        html,
        "MQTT Password: <input type=\"password\" name=\"mqtt_pass\" value=\"{}\"><br>",
        escape(settings.mqtt_pass.as_deref().unwrap_or_default())
    )?;

    html.push_str("CAN Mode: <select name=\"can_mode\">");
    for mode in CanMode::ALL {
        let label = match mode {
            CanMode::Loopback => "Loopback",
            CanMode::Normal => "Normal",
        };
        write!(
            html,
            "<option value=\"{}\"{}>{}</option>",
            mode,
            selected(mode == settings.can_mode),
            label
        )?;
    }
    html.push_str("</select><br>\n");

    html.push_str("CAN Bitrate: <select name=\"bitrate\">");
    for rate in Bitrate::ALL {
        write!(
            html,
            "<option value=\"{}\"{}>{} kbps</option>",
            rate,
            selected(rate == settings.bitrate),
            rate
        )?;
    }
    html.push_str("</select><br>\n");

    writeln!(
        html,
        "CAN ID (hex): <input type=\"text\" name=\"can_id\" value=\"{:X}\" placeholder=\"e.g. 100\"><br>",
        settings.can_id
    )?;
    writeln!(
        html,
        "Data (hex, space separated): <input type=\"text\" name=\"data_hex\" value=\"{}\" \
         placeholder=\"12 34 56 78 9A BC DE F0\"><br>",
        settings.payload
    )?;
    html.push_str("<input type=\"submit\" value=\"Save Config\">\n</form>\n");

    html.push_str("<p>\n<a href=\"/start\"><button>Start Bridge</button></a>\n");
    html.push_str("<a href=\"/stop\"><button>Stop Bridge</button></a>\n</p>\n");
    html.push_str("</body>\n</html>\n");

    Ok(html)
}

fn selected(is_selected: bool) -> &'static str {
    if is_selected {
        " selected"
    } else {
        ""
    }
}

/// Minimal body for the 500 response
pub const ERROR_PAGE: &str =
    "<!DOCTYPE html>\n<html><body><h1>Internal Server Error</h1></body></html>\n";
