//! Settings types.
//!
//! Every struct uses camelCase keys and `#[serde(default)]`, so a settings
//! file only needs the values it changes.

use beatbox_core::{Behavior, normalize_path};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeatboxSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Demo endpoint settings.
    pub endpoint: EndpointSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl BeatboxSettings {
    /// Check values that deserialise but cannot be served.
    pub fn validate(&self) -> Result<()> {
        if self.server.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueue must be greater than zero".into(),
            ));
        }
        let _ = normalize_path(&self.endpoint.path)
            .map_err(|e| SettingsError::InvalidValue(e.to_string()))?;
        self.endpoint
            .behavior
            .validate()
            .map_err(|e| SettingsError::InvalidValue(e.to_string()))
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Outbound frames buffered per connection before sends are dropped.
    pub outbound_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            outbound_queue: 1024,
        }
    }
}

/// Endpoint path and behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// WebSocket path.
    pub path: String,
    /// Transport behavior.
    pub behavior: Behavior,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            path: "ws".to_owned(),
            behavior: Behavior::default(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}
