//! Row and payload types shared with the portal backend.
//!
//! These types mirror the backend table shapes (snake_case columns) and
//! the application-level payload tracked on the presence channel. The
//! transport envelope is handled by `portico-realtime`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Table names watched by the sync layer.
pub mod tables {
    pub const NOTIFICATIONS: &str = "notifications";
    pub const PRESENCE_SETTINGS: &str = "presence_settings";

    // Domain tables fanned out through the sync coordinator.
    pub const DOCUMENTS: &str = "documents";
    pub const EVENTS: &str = "events";
    pub const OBJECTIVES: &str = "objectives";
    pub const COMMENTS: &str = "comments";
    pub const REPORTS: &str = "reports";
}

/// Maximum length of a custom presence status, bounding broadcast
/// payload size.
pub const MAX_CUSTOM_STATUS_LEN: usize = 50;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// A `notifications` table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    /// `None` = broadcast to all users.
    #[serde(default)]
    pub target_user_id: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    /// Bumped by the backend on every mutation; used to discard stale
    /// feed updates.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Notification {
    /// Whether this notification is addressed to `user_id`.
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        match &self.target_user_id {
            None => true,
            Some(target) => target == user_id,
        }
    }
}

/// Ephemeral presence entry: tracked payload on the way out, parsed
/// snapshot meta on the way in. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub display_name: String,
    /// Timestamp of the last broadcast.
    pub online_at: DateTime<Utc>,
    pub status: String,
}

/// A `presence_settings` table row, one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSettings {
    pub user_id: String,
    #[serde(default = "default_show_presence")]
    pub show_presence: bool,
    #[serde(default)]
    pub custom_status: Option<String>,
}

fn default_show_presence() -> bool {
    true
}

impl PresenceSettings {
    /// Default settings for a user without a persisted row.
    pub fn default_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            show_presence: true,
            custom_status: None,
        }
    }
}
