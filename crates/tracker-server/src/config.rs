//! Server and hub configuration derived from [`TrackerSettings`].

use std::time::Duration;

use tracker_settings::TrackerSettings;

/// HTTP server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for an ephemeral port).
    pub port: u16,
    /// Origins allowed to open viewer sockets. Empty or `"*"` allows all.
    pub allowed_origins: Vec<String>,
    /// Largest inbound WebSocket frame, in bytes.
    pub max_frame_bytes: usize,
    /// Graceful shutdown budget.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origins: Vec::new(),
            max_frame_bytes: 512,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            allowed_origins: settings.server.allowed_origins.clone(),
            max_frame_bytes: settings.hub.max_frame_bytes,
            shutdown_timeout: settings.server.shutdown_timeout(),
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hub queue sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the broadcast queue.
    pub broadcast_capacity: usize,
    /// Capacity of each connection's mailbox.
    pub mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            mailbox_capacity: 256,
        }
    }
}

impl HubConfig {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            broadcast_capacity: settings.hub.broadcast_capacity.max(1),
            mailbox_capacity: settings.hub.mailbox_capacity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_frame_bytes, 512);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn from_settings_copies_values() {
        let mut settings = TrackerSettings::default();
        settings.server.port = 9000;
        settings.server.allowed_origins = vec!["http://localhost:5173".into()];
        settings.hub.mailbox_capacity = 16;
        settings.hub.max_frame_bytes = 1024;

        let server = ServerConfig::from_settings(&settings);
        assert_eq!(server.bind_addr(), "0.0.0.0:9000");
        assert_eq!(server.allowed_origins, vec!["http://localhost:5173"]);
        assert_eq!(server.max_frame_bytes, 1024);
        assert_eq!(server.shutdown_timeout, Duration::from_secs(10));

        let hub = HubConfig::from_settings(&settings);
        assert_eq!(hub.mailbox_capacity, 16);
        assert_eq!(hub.broadcast_capacity, 256);
    }

    #[test]
    fn zero_capacities_are_clamped() {
        let mut settings = TrackerSettings::default();
        settings.hub.broadcast_capacity = 0;
        settings.hub.mailbox_capacity = 0;
        let hub = HubConfig::from_settings(&settings);
        assert_eq!(hub.broadcast_capacity, 1);
        assert_eq!(hub.mailbox_capacity, 1);
    }
}
