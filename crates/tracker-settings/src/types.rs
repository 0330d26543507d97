//! Settings schema with compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub auth: AuthSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Origins allowed to open viewer sockets. Empty or `"*"` allows all.
    pub allowed_origins: Vec<String>,
    /// How long shutdown waits for in-flight work, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Connection hub sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Capacity of the hub's broadcast queue.
    pub broadcast_capacity: usize,
    /// Capacity of each connection's outbound mailbox.
    pub mailbox_capacity: usize,
    /// Largest inbound frame accepted from a viewer, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            mailbox_capacity: 256,
            max_frame_bytes: 512,
        }
    }
}

/// Device authentication cache timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub cache_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl AuthSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path.
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("saint-tracker.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level filter. `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
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

impl TrackerSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("hub.broadcast_capacity", self.hub.broadcast_capacity as u64),
            ("hub.mailbox_capacity", self.hub.mailbox_capacity as u64),
            ("hub.max_frame_bytes", self.hub.max_frame_bytes as u64),
            ("auth.cache_ttl_secs", self.auth.cache_ttl_secs),
            ("auth.sweep_interval_secs", self.auth.sweep_interval_secs),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
            }
        }
        Ok(())
    }
}
