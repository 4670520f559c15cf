//! Configuration schema. Every section derives serde defaults so a
//! partial config file loads cleanly.

use serde::{Deserialize, Serialize};

/// Root configuration for the Portico sync subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PorticoConfig {
    pub realtime: RealtimeSection,
    pub api: ApiSection,
    pub presence: PresenceSection,
    pub logging: LoggingSection,
}

/// Realtime push transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    /// WebSocket endpoint of the realtime server.
    pub url: String,
    /// Publishable API key.
    pub api_key: String,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

/// REST data-api settings (bulk reads and mutations).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Base URL of the REST endpoint (e.g. "https://portal.example.com/rest/v1").
    pub base_url: String,
    /// Publishable API key.
    pub api_key: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
        }
    }
}

/// Presence system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    pub enabled: bool,
    /// Presence room shared by all portal clients.
    pub room: String,
    /// How often the local presence payload is re-broadcast, refreshing
    /// `online_at`. Also bounds how long a user who turned visibility
    /// off can linger in peers' snapshots.
    pub retrack_interval_secs: u64,
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            room: "portal".to_string(),
            retrack_interval_secs: 60,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default tracing filter when RUST_LOG is unset.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
