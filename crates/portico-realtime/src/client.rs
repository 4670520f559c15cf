//! Command handle for the realtime connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::connection::connection_loop;
use crate::types::{ChannelConfig, RealtimeConfig, RealtimeEvent};

/// Commands sent to the connection task from the application layer.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel {
        topic: String,
        config: ChannelConfig,
    },
    LeaveChannel {
        topic: String,
    },
    PresenceTrack {
        topic: String,
        payload: serde_json::Value,
    },
    PresenceUntrack {
        topic: String,
    },
    Disconnect,
}

/// Handle for interacting with the realtime connection.
///
/// All methods are non-blocking and send commands to the background
/// connection task. The handle is cheap to clone.
#[derive(Clone)]
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
    connected: Arc<RwLock<bool>>,
    shutdown: Arc<AtomicBool>,
}

impl RealtimeClient {
    /// Create a new client and start the background connection.
    /// Returns `(client, event_receiver)`.
    pub fn connect(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(RwLock::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(connection_loop(
            config, connected, shutdown, event_tx, command_rx,
        ));

        (client, event_rx)
    }

    /// Join a channel with the given configuration.
    pub async fn join_channel(&self, topic: &str, config: ChannelConfig) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::JoinChannel {
                topic: topic.to_string(),
                config,
            })
            .await;
    }

    /// Leave a channel.
    pub async fn leave_channel(&self, topic: &str) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::LeaveChannel {
                topic: topic.to_string(),
            })
            .await;
    }

    /// Track presence on a channel. The payload is remembered and re-sent
    /// automatically after a reconnect.
    pub async fn presence_track(&self, topic: &str, payload: serde_json::Value) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::PresenceTrack {
                topic: topic.to_string(),
                payload,
            })
            .await;
    }

    /// Untrack presence on a channel.
    pub async fn presence_untrack(&self, topic: &str) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::PresenceUntrack {
                topic: topic.to_string(),
            })
            .await;
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Disconnect from the server and stop reconnecting. The flag also
    /// stops the reconnect loop of a client that never managed to
    /// connect, where the command itself would sit queued forever.
    pub async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(RealtimeCommand::Disconnect).await;
    }
}
