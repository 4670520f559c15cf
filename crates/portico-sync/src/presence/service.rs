//! Async presence service: channel translator, settings feed consumer,
//! own-broadcast gating, and the periodic re-track tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portico_common::{ApiError, PorticoError};
use portico_realtime::{
    ChangeEvent, ChangeFeed, ChannelEvent, PresenceChannel, RealtimeClient, RouterHandle,
};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::PortalApi;
use crate::identity::Identity;
use crate::presence::tracker::PresenceTracker;
use crate::protocol::{tables, PresenceRecord, PresenceSettings};

/// Events emitted by the presence system for the UI to consume.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// A full snapshot was applied.
    Synced { online: usize, visible: usize },
    /// Informational join signal; authoritative state arrives with the
    /// next snapshot.
    UserJoined { user_id: String },
    /// Informational leave signal.
    UserLeft { user_id: String },
    SettingsChanged { user_id: String },
    Disconnected,
    Error(String),
}

/// Maintains the who-is-online projection for one session.
pub struct PresenceService {
    tracker: Arc<RwLock<PresenceTracker>>,
    channel: Arc<PresenceChannel>,
    settings_feed: ChangeFeed,
    api: Arc<dyn PortalApi>,
    identity: Identity,
    tasks: Vec<JoinHandle<()>>,
}

impl PresenceService {
    /// Bulk-fetch visibility settings, subscribe to their change feed,
    /// and join the shared presence channel. A failed settings fetch is
    /// surfaced to the caller.
    pub async fn start(
        client: &RealtimeClient,
        router: &RouterHandle,
        api: Arc<dyn PortalApi>,
        identity: &Identity,
        room: &str,
        retrack_interval_secs: u64,
    ) -> Result<(Self, mpsc::Receiver<PresenceEvent>), PorticoError> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let tracker = Arc::new(RwLock::new(PresenceTracker::new()));

        let rows = api.fetch_presence_settings().await?;
        tracker.write().await.load_settings(rows);

        let (settings_feed, settings_rx) =
            ChangeFeed::open(client, router, tables::PRESENCE_SETTINGS, None).await?;
        let (channel, presence_rx) =
            PresenceChannel::join(client, router, room, &identity.user_id).await?;
        let channel = Arc::new(channel);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(presence_loop(
            presence_rx,
            Arc::clone(&tracker),
            Arc::clone(&channel),
            identity.clone(),
            event_tx.clone(),
        )));
        tasks.push(tokio::spawn(settings_loop(
            settings_rx,
            Arc::clone(&tracker),
            Arc::clone(&api),
            Arc::clone(&channel),
            identity.clone(),
            event_tx,
        )));
        tasks.push(tokio::spawn(retrack_loop(
            retrack_interval_secs,
            Arc::clone(&tracker),
            Arc::clone(&channel),
            identity.clone(),
        )));

        Ok((
            Self {
                tracker,
                channel,
                settings_feed,
                api,
                identity: identity.clone(),
                tasks,
            },
            event_rx,
        ))
    }

    /// The externally visible online set, recomputed on demand.
    pub async fn visible_users(&self) -> Vec<PresenceRecord> {
        self.tracker.read().await.visible_users()
    }

    /// The local user's current settings (defaults when no row exists).
    pub async fn settings(&self) -> PresenceSettings {
        self.tracker.read().await.settings_for(&self.identity.user_id)
    }

    /// Upsert the local user's settings row. The local projection and
    /// broadcast state react to the subsequent settings feed event, not
    /// to this call.
    pub async fn update_settings(
        &self,
        show_presence: bool,
        custom_status: Option<String>,
    ) -> Result<(), ApiError> {
        let settings = PresenceSettings {
            user_id: self.identity.user_id.clone(),
            show_presence,
            custom_status,
        };
        self.api.upsert_presence_settings(&settings).await
    }

    /// Retract our broadcast, leave both channels, and stop the tasks.
    pub async fn shutdown(&self) {
        self.channel.untrack().await;
        self.channel.close().await;
        self.settings_feed.close().await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The payload broadcast for the local user.
async fn own_payload(
    tracker: &Arc<RwLock<PresenceTracker>>,
    identity: &Identity,
) -> Option<serde_json::Value> {
    let settings = tracker.read().await.settings_for(&identity.user_id);
    let record = PresenceRecord {
        user_id: identity.user_id.clone(),
        display_name: identity.display_name.clone(),
        online_at: Utc::now(),
        status: settings
            .custom_status
            .unwrap_or_else(|| "online".to_string()),
    };
    serde_json::to_value(&record).ok()
}

/// Broadcast our presence iff the current settings allow it.
async fn track_if_visible(
    tracker: &Arc<RwLock<PresenceTracker>>,
    channel: &PresenceChannel,
    identity: &Identity,
) {
    if !tracker.read().await.show_presence(&identity.user_id) {
        return;
    }
    if let Some(payload) = own_payload(tracker, identity).await {
        channel.track(payload).await;
    }
}

/// Align our broadcast with our current settings row: (re)track when
/// visible, retract when not.
async fn reconcile_own_broadcast(
    tracker: &Arc<RwLock<PresenceTracker>>,
    channel: &PresenceChannel,
    identity: &Identity,
) {
    if tracker.read().await.show_presence(&identity.user_id) {
        track_if_visible(tracker, channel, identity).await;
    } else {
        channel.untrack().await;
    }
}

/// Translate presence channel events into tracker mutations and UI
/// events.
async fn presence_loop(
    mut rx: broadcast::Receiver<ChannelEvent>,
    tracker: Arc<RwLock<PresenceTracker>>,
    channel: Arc<PresenceChannel>,
    identity: Identity,
    event_tx: mpsc::Sender<PresenceEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(ChannelEvent::Joined) => {
                debug!("Joined presence channel");
                track_if_visible(&tracker, &channel, &identity).await;
            }
            Ok(ChannelEvent::PresenceState(state)) => {
                let (online, visible) = {
                    let mut tracker = tracker.write().await;
                    tracker.apply_snapshot(state);
                    (tracker.online_count(), tracker.visible_users().len())
                };
                let _ = event_tx.send(PresenceEvent::Synced { online, visible }).await;
            }
            Ok(ChannelEvent::PresenceDiff { joins, leaves }) => {
                // Informational only: the next snapshot is authoritative.
                for user_id in joins.keys() {
                    let _ = event_tx
                        .send(PresenceEvent::UserJoined {
                            user_id: user_id.clone(),
                        })
                        .await;
                }
                for user_id in leaves.keys() {
                    let _ = event_tx
                        .send(PresenceEvent::UserLeft {
                            user_id: user_id.clone(),
                        })
                        .await;
                }
            }
            Ok(ChannelEvent::ChannelError(message)) => {
                warn!(message = %message, "Presence channel error");
                let _ = event_tx.send(PresenceEvent::Error(message)).await;
            }
            Ok(ChannelEvent::Disconnected) => {
                // Projection goes stale until the rejoin snapshot.
                let _ = event_tx.send(PresenceEvent::Disconnected).await;
            }
            Ok(ChannelEvent::Change(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Presence stream lagged; next snapshot reconciles");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Presence loop stopped");
}

/// Keep the settings map current and reconcile our own broadcast when
/// our row changes.
async fn settings_loop(
    mut rx: broadcast::Receiver<ChannelEvent>,
    tracker: Arc<RwLock<PresenceTracker>>,
    api: Arc<dyn PortalApi>,
    channel: Arc<PresenceChannel>,
    identity: Identity,
    event_tx: mpsc::Sender<PresenceEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(ChannelEvent::Joined) => {
                resync_settings(&tracker, api.as_ref(), &channel, &identity).await;
            }
            Ok(ChannelEvent::Change(change)) => {
                apply_settings_change(&change, &tracker, &channel, &identity, &event_tx).await;
            }
            Ok(ChannelEvent::ChannelError(message)) => {
                warn!(message = %message, "Settings feed channel error");
            }
            Ok(ChannelEvent::Disconnected) => {
                debug!("Settings feed disconnected; map stale until rejoin");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Settings feed lagged; resyncing");
                resync_settings(&tracker, api.as_ref(), &channel, &identity).await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Settings loop stopped");
}

async fn resync_settings(
    tracker: &Arc<RwLock<PresenceTracker>>,
    api: &dyn PortalApi,
    channel: &PresenceChannel,
    identity: &Identity,
) {
    match api.fetch_presence_settings().await {
        Ok(rows) => {
            tracker.write().await.load_settings(rows);
            // Our own row may have changed while we were away.
            reconcile_own_broadcast(tracker, channel, identity).await;
        }
        Err(e) => warn!(error = %e, "Settings resync failed"),
    }
}

async fn apply_settings_change(
    change: &ChangeEvent,
    tracker: &Arc<RwLock<PresenceTracker>>,
    channel: &PresenceChannel,
    identity: &Identity,
    event_tx: &mpsc::Sender<PresenceEvent>,
) {
    let affected = match change {
        ChangeEvent::Insert { row } | ChangeEvent::Update { row, .. } => {
            match serde_json::from_value::<PresenceSettings>(row.clone()) {
                Ok(settings) => {
                    let user_id = settings.user_id.clone();
                    tracker.write().await.upsert_settings(settings);
                    Some(user_id)
                }
                Err(e) => {
                    debug!(error = %e, "Unparseable settings row");
                    None
                }
            }
        }
        ChangeEvent::Delete { old_row } => {
            match old_row.get("user_id").and_then(|id| id.as_str()) {
                Some(user_id) => {
                    tracker.write().await.remove_settings(user_id);
                    Some(user_id.to_string())
                }
                None => {
                    debug!("Settings delete event without user_id");
                    None
                }
            }
        }
    };

    let Some(user_id) = affected else { return };
    let _ = event_tx
        .send(PresenceEvent::SettingsChanged {
            user_id: user_id.clone(),
        })
        .await;

    // Stop broadcasting when our visibility turned off, (re)broadcast
    // otherwise so a status change shows up without waiting for the
    // next tick.
    if user_id == identity.user_id {
        reconcile_own_broadcast(tracker, channel, identity).await;
    }
}

/// Periodic re-broadcast refreshing `online_at`. This interval is the
/// upper bound on how long a hidden user lingers in peers' snapshots.
async fn retrack_loop(
    interval_secs: u64,
    tracker: Arc<RwLock<PresenceTracker>>,
    channel: Arc<PresenceChannel>,
    identity: Identity,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // The first tick fires immediately; the join handler already tracks.
    interval.tick().await;
    loop {
        interval.tick().await;
        track_if_visible(&tracker, &channel, &identity).await;
    }
}
