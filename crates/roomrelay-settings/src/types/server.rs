//! Server and session settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener and static asset settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Directory holding `index.html`, `host.html` and the `/static` assets.
    pub static_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// What happens when a client's outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Close the slow client's connection.
    #[default]
    Disconnect,
    /// Discard the frame that did not fit and keep the connection.
    DropNewest,
}

impl OverflowPolicy {
    /// Parse the kebab-case name used in settings files and env vars.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "disconnect" => Some(Self::Disconnect),
            "drop-newest" | "drop_newest" => Some(Self::DropNewest),
            _ => None,
        }
    }
}

/// Per-connection session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Frames that may wait in one client's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Policy applied when the outbound queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_bytes: usize,
    /// Seconds between keep-alive pings (`0` disables them).
    pub keepalive_interval_secs: u64,
}

impl SessionSettings {
    /// Keep-alive ping period, if enabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0)
            .then(|| Duration::from_secs(self.keepalive_interval_secs))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            overflow_policy: OverflowPolicy::Disconnect,
            max_message_bytes: 64 * 1024,
            keepalive_interval_secs: 30,
        }
    }
}
