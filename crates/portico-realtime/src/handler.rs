//! Incoming Phoenix message handling: join acks, row changes, presence.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::connection::{send_frame, track_frame, ChannelMap, WsSink};
use crate::types::{ChangeEvent, PhoenixMessage, RealtimeEvent};

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse a Phoenix presence map into `HashMap<key, Vec<meta>>`.
///
/// The server sends presence as `{ "key": { "metas": [{ ... }] } }`.
pub(crate) fn parse_presence_map(
    value: &serde_json::Value,
) -> HashMap<String, Vec<serde_json::Value>> {
    let mut result = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            if let Some(metas) = val.get("metas").and_then(|m| m.as_array()) {
                result.insert(key.clone(), metas.clone());
            }
        }
    }
    result
}

/// Parse a `postgres_changes` payload into a tagged [`ChangeEvent`].
///
/// The payload data carries `{type, record, old_record}`; events with an
/// unknown type or missing rows are dropped (`None`).
pub(crate) fn parse_change_event(payload: &serde_json::Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    match data.get("type")?.as_str()? {
        "INSERT" => Some(ChangeEvent::Insert {
            row: data.get("record")?.clone(),
        }),
        "UPDATE" => Some(ChangeEvent::Update {
            row: data.get("record")?.clone(),
            old_row: data.get("old_record").filter(|v| !v.is_null()).cloned(),
        }),
        "DELETE" => Some(ChangeEvent::Delete {
            old_row: data.get("old_record")?.clone(),
        }),
        _ => None,
    }
}

/// Handle a single incoming Phoenix message.
pub(crate) async fn handle_phoenix_message(
    msg: &PhoenixMessage,
    joined_channels: &ChannelMap,
    ws: &Arc<Mutex<WsSink>>,
    event_tx: &mpsc::Sender<RealtimeEvent>,
) {
    let topic = strip_topic_prefix(&msg.topic);

    match msg.event.as_str() {
        "phx_reply" => {
            let status = msg.payload.get("status").and_then(|s| s.as_str());
            match status {
                Some("ok") => {
                    // Only a reply to our phx_join counts as a join ack;
                    // replies to track/leave frames are just logged.
                    let (is_join_ack, stored_payload) = {
                        let channels = joined_channels.read().await;
                        match channels.get(topic) {
                            Some(pending)
                                if pending.join_ref.is_some()
                                    && pending.join_ref == msg.msg_ref =>
                            {
                                (true, pending.presence_payload.clone())
                            }
                            _ => (false, None),
                        }
                    };
                    if !is_join_ack {
                        debug!(topic = %topic, "Channel reply: ok");
                        return;
                    }
                    debug!(topic = %topic, "Channel joined");
                    let _ = event_tx
                        .send(RealtimeEvent::ChannelJoined {
                            topic: topic.to_string(),
                        })
                        .await;
                    // Re-send the stored presence payload so a rejoin
                    // restores our own broadcast without the app's help.
                    if let Some(payload) = stored_payload {
                        send_frame(ws, track_frame(topic, payload)).await;
                    }
                }
                Some(status) => {
                    let message = msg
                        .payload
                        .get("response")
                        .and_then(|r| r.get("reason"))
                        .and_then(|r| r.as_str())
                        .unwrap_or("unknown error")
                        .to_string();
                    warn!(topic = %topic, status = %status, "Channel reply error");
                    let _ = event_tx
                        .send(RealtimeEvent::ChannelError {
                            topic: topic.to_string(),
                            message,
                        })
                        .await;
                }
                None => {}
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            let _ = event_tx
                .send(RealtimeEvent::ChannelError {
                    topic: topic.to_string(),
                    message: "Channel error".to_string(),
                })
                .await;
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            let _ = event_tx
                .send(RealtimeEvent::ChannelError {
                    topic: topic.to_string(),
                    message: "Channel closed".to_string(),
                })
                .await;
        }
        "postgres_changes" => match parse_change_event(&msg.payload) {
            Some(event) => {
                debug!(topic = %topic, "Row change received");
                let _ = event_tx
                    .send(RealtimeEvent::Change {
                        topic: topic.to_string(),
                        event,
                    })
                    .await;
            }
            None => {
                debug!(topic = %topic, "Unparseable row change payload");
            }
        },
        "presence_state" => {
            let state = parse_presence_map(&msg.payload);
            debug!(topic = %topic, users = state.len(), "Presence state received");
            let _ = event_tx
                .send(RealtimeEvent::PresenceState {
                    topic: topic.to_string(),
                    state,
                })
                .await;
        }
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(parse_presence_map)
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(parse_presence_map)
                .unwrap_or_default();
            debug!(
                topic = %topic,
                joins = joins.len(),
                leaves = leaves.len(),
                "Presence diff received"
            );
            let _ = event_tx
                .send(RealtimeEvent::PresenceDiff {
                    topic: topic.to_string(),
                    joins,
                    leaves,
                })
                .await;
        }
        _ => {
            debug!(
                topic = %topic,
                event = %msg.event,
                "Unhandled Phoenix event"
            );
        }
    }
}
