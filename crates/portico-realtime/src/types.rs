//! Protocol envelope, configuration, and event types for the realtime client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the realtime push server.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint (e.g., "wss://portal.example.com/realtime/v1/websocket").
    pub url: String,
    /// Publishable API key, passed as a query parameter.
    pub api_key: String,
    /// Optional access token (JWT) for authenticated connections.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            access_token: None,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl RealtimeConfig {
    /// Build the full WebSocket URL including the API key.
    pub(crate) fn ws_url(&self) -> String {
        format!("{}?apikey={}&vsn=1.0.0", self.url, self.api_key)
    }
}

// ---------------------------------------------------------------------------
// Phoenix Protocol Types
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Channel Configuration
// ---------------------------------------------------------------------------

/// Configuration sent in the `phx_join` payload for a channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Presence key identifying this client in presence state, if the
    /// channel tracks presence.
    pub presence_key: Option<String>,
    /// Row-change subscriptions requested on this channel.
    pub postgres_changes: Vec<PostgresChangesConfig>,
}

/// A single row-change subscription: one table, optionally filtered.
#[derive(Debug, Clone)]
pub struct PostgresChangesConfig {
    pub table: String,
    /// Server-side filter in `column=eq.value` form.
    pub filter: Option<String>,
}

impl ChannelConfig {
    /// Serialize to the JSON payload expected by the server on phx_join.
    pub(crate) fn to_join_payload(&self, access_token: Option<&str>) -> serde_json::Value {
        let changes: Vec<serde_json::Value> = self
            .postgres_changes
            .iter()
            .map(|c| {
                let mut entry = serde_json::json!({
                    "event": "*",
                    "schema": "public",
                    "table": c.table,
                });
                if let Some(filter) = &c.filter {
                    entry["filter"] = serde_json::Value::String(filter.clone());
                }
                entry
            })
            .collect();

        let mut payload = serde_json::json!({
            "config": {
                "presence": {
                    "key": self.presence_key.clone().unwrap_or_default()
                },
                "postgres_changes": changes
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = serde_json::Value::String(token.to_string());
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A row-change event delivered on a change feed.
///
/// Rows are raw JSON objects; consumers deserialize them into their own
/// table types and must treat application as idempotent, since delivery
/// is at-least-once and unordered across filters.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Insert {
        row: serde_json::Value,
    },
    Update {
        row: serde_json::Value,
        old_row: Option<serde_json::Value>,
    },
    Delete {
        old_row: serde_json::Value,
    },
}

/// Events emitted by the connection task, tagged with their topic.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// WebSocket connection established.
    Connected,
    /// WebSocket connection lost.
    Disconnected,
    /// Successfully joined (or rejoined) a channel.
    ChannelJoined { topic: String },
    /// Channel closed or errored.
    ChannelError { topic: String, message: String },
    /// A row-change event received on a channel.
    Change { topic: String, event: ChangeEvent },
    /// Full presence state snapshot.
    PresenceState {
        topic: String,
        state: HashMap<String, Vec<serde_json::Value>>,
    },
    /// Incremental presence changes.
    PresenceDiff {
        topic: String,
        joins: HashMap<String, Vec<serde_json::Value>>,
        leaves: HashMap<String, Vec<serde_json::Value>>,
    },
    /// Transport-level error.
    Error(String),
}

/// Per-topic events delivered to subscribers by the [`EventRouter`].
///
/// `Joined` doubles as the resync marker: it is emitted after every
/// successful (re)join, and consumers are expected to re-run their bulk
/// fetch when they see it, since missed events are never replayed.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Joined,
    Change(ChangeEvent),
    PresenceState(HashMap<String, Vec<serde_json::Value>>),
    PresenceDiff {
        joins: HashMap<String, Vec<serde_json::Value>>,
        leaves: HashMap<String, Vec<serde_json::Value>>,
    },
    ChannelError(String),
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phoenix_message_round_trips() {
        let msg = PhoenixMessage {
            topic: "feed:notifications".into(),
            event: "phx_join".into(),
            payload: serde_json::json!({"config": {}}),
            msg_ref: Some("1".into()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"ref\":\"1\""));
        let parsed: PhoenixMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.topic, "feed:notifications");
        assert_eq!(parsed.event, "phx_join");
        assert_eq!(parsed.msg_ref.as_deref(), Some("1"));
    }

    #[test]
    fn join_payload_includes_postgres_changes() {
        let config = ChannelConfig {
            presence_key: None,
            postgres_changes: vec![PostgresChangesConfig {
                table: "notifications".into(),
                filter: None,
            }],
        };
        let payload = config.to_join_payload(None);
        let changes = &payload["config"]["postgres_changes"];
        assert_eq!(changes[0]["event"], "*");
        assert_eq!(changes[0]["schema"], "public");
        assert_eq!(changes[0]["table"], "notifications");
        assert!(changes[0].get("filter").is_none());
    }

    #[test]
    fn join_payload_includes_filter_and_key() {
        let config = ChannelConfig {
            presence_key: Some("user-1".into()),
            postgres_changes: vec![PostgresChangesConfig {
                table: "presence_settings".into(),
                filter: Some("user_id=eq.user-1".into()),
            }],
        };
        let payload = config.to_join_payload(Some("jwt-token"));
        assert_eq!(payload["config"]["presence"]["key"], "user-1");
        assert_eq!(
            payload["config"]["postgres_changes"][0]["filter"],
            "user_id=eq.user-1"
        );
        assert_eq!(payload["access_token"], "jwt-token");
    }

    #[test]
    fn ws_url_appends_api_key() {
        let config = RealtimeConfig {
            url: "wss://portal.example.com/realtime/v1/websocket".into(),
            api_key: "anon-key".into(),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url(),
            "wss://portal.example.com/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
    }
}
