//! Background task managing the WebSocket connection with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::client::RealtimeCommand;
use crate::handler::handle_phoenix_message;
use crate::types::{ChannelConfig, PhoenixMessage, RealtimeConfig, RealtimeEvent};

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// Next reconnect delay: doubles up to the configured maximum.
fn next_backoff(current: u64, max: u64) -> u64 {
    (current * 2).min(max)
}

/// State for channels that must be (re)joined on reconnect.
///
/// `join_ref` is the ref of the last phx_join sent for this topic; a
/// phx_reply carrying it is a join acknowledgment rather than an ack for
/// a track or leave frame.
pub(crate) struct PendingChannel {
    pub config: ChannelConfig,
    pub presence_payload: Option<serde_json::Value>,
    pub join_ref: Option<String>,
}

pub(crate) type ChannelMap = Arc<RwLock<HashMap<String, PendingChannel>>>;

/// Serialize and send a single Phoenix frame.
pub(crate) async fn send_frame(ws: &Arc<Mutex<WsSink>>, msg: PhoenixMessage) {
    match serde_json::to_string(&msg) {
        Ok(json) => {
            let mut writer = ws.lock().await;
            if let Err(e) = writer.send(WsMessage::Text(json.into())).await {
                warn!(error = %e, topic = %msg.topic, "Failed to send frame");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize frame"),
    }
}

fn join_frame(topic: &str, config: &ChannelConfig, access_token: Option<&str>) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "phx_join".to_string(),
        payload: config.to_join_payload(access_token),
        msg_ref: Some(next_ref()),
    }
}

fn leave_frame(topic: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "phx_leave".to_string(),
        payload: serde_json::json!({}),
        msg_ref: Some(next_ref()),
    }
}

pub(crate) fn track_frame(topic: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "presence".to_string(),
        payload: serde_json::json!({
            "type": "presence",
            "event": "track",
            "payload": payload
        }),
        msg_ref: Some(next_ref()),
    }
}

fn untrack_frame(topic: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: "presence".to_string(),
        payload: serde_json::json!({
            "type": "presence",
            "event": "untrack"
        }),
        msg_ref: Some(next_ref()),
    }
}

/// Rejoin every known channel after a (re)connect, refreshing join refs.
async fn rejoin_channels(
    ws: &Arc<Mutex<WsSink>>,
    channels: &ChannelMap,
    access_token: Option<&str>,
) {
    let mut channels = channels.write().await;
    for (topic, pending) in channels.iter_mut() {
        let frame = join_frame(topic, &pending.config, access_token);
        pending.join_ref = frame.msg_ref.clone();
        send_frame(ws, frame).await;
    }
}

/// Background task managing the WebSocket connection.
///
/// Runs until an explicit `Disconnect` command; transport drops trigger
/// an exponential-backoff reconnect that rejoins all channels and
/// re-tracks any stored presence payloads.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    shutdown: Arc<AtomicBool>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let joined_channels: ChannelMap = Arc::new(RwLock::new(HashMap::new()));
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Realtime connection task stopped");
            return;
        }
        let url = config.ws_url();
        info!(url = %config.url, "Connecting to realtime server");

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                rejoin_channels(&ws_write, &joined_channels, config.access_token.as_deref())
                    .await;

                // Heartbeat keeps the socket alive through proxies.
                let heartbeat_write = Arc::clone(&ws_write);
                let heartbeat_interval = config.heartbeat_interval_secs;
                let heartbeat_handle = tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(Duration::from_secs(heartbeat_interval));
                    loop {
                        interval.tick().await;
                        let msg = PhoenixMessage {
                            topic: "phoenix".to_string(),
                            event: "heartbeat".to_string(),
                            payload: serde_json::json!({}),
                            msg_ref: Some(next_ref()),
                        };
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(_) => break,
                        };
                        let mut writer = heartbeat_write.lock().await;
                        if writer.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                });

                // Command forwarder: application commands -> wire frames.
                let cmd_write = Arc::clone(&ws_write);
                let cmd_rx = Arc::clone(&command_rx);
                let cmd_channels = Arc::clone(&joined_channels);
                let cmd_shutdown = Arc::clone(&shutdown);
                let access_token = config.access_token.clone();
                let cmd_handle = tokio::spawn(async move {
                    let mut rx = cmd_rx.lock().await;
                    while let Some(cmd) = rx.recv().await {
                        match cmd {
                            RealtimeCommand::JoinChannel { topic, config } => {
                                let frame = join_frame(&topic, &config, access_token.as_deref());
                                // Register before sending so the join ack
                                // always finds the pending entry.
                                cmd_channels.write().await.insert(
                                    topic,
                                    PendingChannel {
                                        config,
                                        presence_payload: None,
                                        join_ref: frame.msg_ref.clone(),
                                    },
                                );
                                send_frame(&cmd_write, frame).await;
                            }
                            RealtimeCommand::LeaveChannel { topic } => {
                                send_frame(&cmd_write, leave_frame(&topic)).await;
                                cmd_channels.write().await.remove(&topic);
                            }
                            RealtimeCommand::PresenceTrack { topic, payload } => {
                                send_frame(&cmd_write, track_frame(&topic, payload.clone()))
                                    .await;
                                // Store for re-tracking on reconnect.
                                if let Some(ch) = cmd_channels.write().await.get_mut(&topic) {
                                    ch.presence_payload = Some(payload);
                                }
                            }
                            RealtimeCommand::PresenceUntrack { topic } => {
                                send_frame(&cmd_write, untrack_frame(&topic)).await;
                                if let Some(ch) = cmd_channels.write().await.get_mut(&topic) {
                                    ch.presence_payload = None;
                                }
                            }
                            RealtimeCommand::Disconnect => {
                                let topics: Vec<String> =
                                    cmd_channels.read().await.keys().cloned().collect();
                                for topic in topics {
                                    send_frame(&cmd_write, leave_frame(&topic)).await;
                                }
                                cmd_shutdown.store(true, Ordering::SeqCst);
                                let mut writer = cmd_write.lock().await;
                                let _ = writer.send(WsMessage::Close(None)).await;
                                return;
                            }
                        }
                    }
                });

                // Process incoming messages until the socket drops.
                let mut read_stream = ws_read;
                while let Some(msg_result) = read_stream.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => {
                            if let Ok(phoenix_msg) =
                                serde_json::from_str::<PhoenixMessage>(&text)
                            {
                                handle_phoenix_message(
                                    &phoenix_msg,
                                    &joined_channels,
                                    &ws_write,
                                    &event_tx,
                                )
                                .await;
                            } else {
                                debug!(text = %text, "Unrecognized message from server");
                            }
                        }
                        Ok(WsMessage::Close(_)) => {
                            info!("Realtime server closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to realtime server");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            debug!("Realtime connection task stopped");
            return;
        }

        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = next_backoff(reconnect_delay, config.max_reconnect_delay_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PostgresChangesConfig;

    #[test]
    fn next_ref_is_monotonic() {
        let a: u64 = next_ref().parse().unwrap();
        let b: u64 = next_ref().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(next_backoff(1, 30), 2);
        assert_eq!(next_backoff(8, 30), 16);
        assert_eq!(next_backoff(16, 30), 30);
        assert_eq!(next_backoff(30, 30), 30);
    }

    #[test]
    fn join_frame_targets_prefixed_topic() {
        let config = ChannelConfig {
            presence_key: None,
            postgres_changes: vec![PostgresChangesConfig {
                table: "documents".into(),
                filter: None,
            }],
        };
        let frame = join_frame("feed:documents", &config, None);
        assert_eq!(frame.topic, "realtime:feed:documents");
        assert_eq!(frame.event, "phx_join");
        assert!(frame.msg_ref.is_some());
    }

    #[test]
    fn track_frame_wraps_payload() {
        let frame = track_frame("presence:portal", serde_json::json!({"user_id": "u1"}));
        assert_eq!(frame.event, "presence");
        assert_eq!(frame.payload["type"], "presence");
        assert_eq!(frame.payload["event"], "track");
        assert_eq!(frame.payload["payload"]["user_id"], "u1");
    }

    #[test]
    fn untrack_frame_has_no_payload() {
        let frame = untrack_frame("presence:portal");
        assert_eq!(frame.payload["event"], "untrack");
        assert!(frame.payload.get("payload").is_none());
    }
}
