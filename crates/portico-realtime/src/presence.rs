//! Presence channel: broadcast own presence, receive everyone else's.

use std::sync::atomic::{AtomicBool, Ordering};

use portico_common::RealtimeError;
use tokio::sync::broadcast;

use crate::client::RealtimeClient;
use crate::router::RouterHandle;
use crate::types::{ChannelConfig, ChannelEvent};

fn presence_topic(room: &str) -> String {
    format!("presence:{room}")
}

/// An open bidirectional presence subscription.
///
/// `PresenceState` snapshots on the receiver are authoritative full
/// state; `PresenceDiff` join/leave events are informational. A tracked
/// payload is re-broadcast automatically after every reconnect until
/// [`PresenceChannel::untrack`] is called.
pub struct PresenceChannel {
    client: RealtimeClient,
    router: RouterHandle,
    topic: String,
    closed: AtomicBool,
}

impl PresenceChannel {
    /// Join the presence channel for `room`, keyed by `key` (the local
    /// user id; multiple sessions for one user share a key).
    pub async fn join(
        client: &RealtimeClient,
        router: &RouterHandle,
        room: &str,
        key: &str,
    ) -> Result<(Self, broadcast::Receiver<ChannelEvent>), RealtimeError> {
        let topic = presence_topic(room);
        let rx = router.register(&topic).await?;
        let config = ChannelConfig {
            presence_key: Some(key.to_string()),
            postgres_changes: Vec::new(),
        };
        client.join_channel(&topic, config).await;
        Ok((
            Self {
                client: client.clone(),
                router: router.clone(),
                topic,
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broadcast (or refresh) the local presence payload.
    pub async fn track(&self, payload: serde_json::Value) {
        self.client.presence_track(&self.topic, payload).await;
    }

    /// Retract the local presence payload; peers drop us from their next
    /// snapshot.
    pub async fn untrack(&self) {
        self.client.presence_untrack(&self.topic).await;
    }

    /// Leave the channel. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.leave_channel(&self.topic).await;
        self.router.unregister(&self.topic).await;
    }
}
