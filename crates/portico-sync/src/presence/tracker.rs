//! Pure presence state: the online map, the settings map, and the
//! visibility projection over both.
//!
//! The two maps are fed by independent channels with no cross-channel
//! ordering guarantee, so `visible_users()` is recomputed on demand and
//! must be correct under any interleaving of snapshots and settings
//! events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::protocol::{PresenceRecord, PresenceSettings};

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    online: HashMap<String, PresenceRecord>,
    settings: HashMap<String, PresenceSettings>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a full snapshot, replacing the online map wholesale. A key
    /// with multiple metas (several tabs/sessions for one user) collapses
    /// to the first entry.
    pub fn apply_snapshot(&mut self, state: HashMap<String, Vec<serde_json::Value>>) {
        self.online.clear();
        for (key, metas) in state {
            if let Some(record) = parse_presence_meta(&metas) {
                self.online.insert(key, record);
            }
        }
    }

    /// Replace the settings map with a bulk-fetch result.
    pub fn load_settings(&mut self, rows: Vec<PresenceSettings>) {
        self.settings = rows.into_iter().map(|s| (s.user_id.clone(), s)).collect();
    }

    pub fn upsert_settings(&mut self, row: PresenceSettings) {
        self.settings.insert(row.user_id.clone(), row);
    }

    pub fn remove_settings(&mut self, user_id: &str) {
        self.settings.remove(user_id);
    }

    /// Whether a user wants their presence exposed. Users without a
    /// persisted row default to visible.
    pub fn show_presence(&self, user_id: &str) -> bool {
        self.settings
            .get(user_id)
            .map(|s| s.show_presence)
            .unwrap_or(true)
    }

    /// Current settings for a user, falling back to defaults.
    pub fn settings_for(&self, user_id: &str) -> PresenceSettings {
        self.settings
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| PresenceSettings::default_for(user_id))
    }

    /// The externally visible projection: online records whose owner
    /// currently allows it.
    pub fn visible_users(&self) -> Vec<PresenceRecord> {
        self.online
            .values()
            .filter(|r| self.show_presence(&r.user_id))
            .cloned()
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

/// Parse a [`PresenceRecord`] from presence meta entries (first entry
/// wins). Metas missing a user id are dropped; other fields fall back.
pub(crate) fn parse_presence_meta(metas: &[serde_json::Value]) -> Option<PresenceRecord> {
    let meta = metas.first()?;
    Some(PresenceRecord {
        user_id: meta.get("user_id")?.as_str()?.to_string(),
        display_name: meta
            .get("display_name")
            .and_then(|n| n.as_str())
            .unwrap_or("Unknown")
            .to_string(),
        online_at: meta
            .get("online_at")
            .and_then(|t| t.as_str())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        status: meta
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("online")
            .to_string(),
    })
}
