//! Settings schema.
//!
//! Keys are camelCase on disk. Every section defaults independently, so a
//! file only needs the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Bot authorization request.
    pub auth: AuthSettings,
    /// Transport connection.
    pub transport: TransportSettings,
    /// Local media.
    pub media: MediaSettings,
    /// Diagnostics output.
    pub logging: LoggingSettings,
}

/// Bot authorization request settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Endpoint the start request is POSTed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body of the start request.
    pub request_data: Value,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            headers: BTreeMap::new(),
            request_data: Value::Object(serde_json::Map::new()),
            timeout_ms: 30_000,
        }
    }
}

/// Transport connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// WebSocket URL used when authorization does not supply one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Capacity of the outbound frame queue.
    pub send_queue: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: None,
            send_queue: 256,
        }
    }
}

/// Local media settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    /// Start with the microphone enabled.
    pub enable_mic: bool,
    /// Start with the camera enabled.
    pub enable_cam: bool,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            enable_mic: true,
            enable_cam: false,
        }
    }
}

/// Diagnostics settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive.
    pub level: String,
    /// Emit one JSON object per event.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
