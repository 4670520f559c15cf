//! Per-topic fan-out of connection events to bounded subscriber streams.
//!
//! The connection task emits one multiplexed stream of [`RealtimeEvent`]s
//! for the whole socket. The router splits it by topic into bounded
//! broadcast channels, one per logical subscription, so each store drains
//! its own stream on its own single consumer task. A slow consumer sees
//! `RecvError::Lagged` instead of growing an unbounded queue, and must
//! resync the same way it does after a rejoin.

use std::collections::HashMap;
use std::sync::Arc;

use portico_common::RealtimeError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{ChannelEvent, RealtimeEvent};

/// Buffered events per subscriber before lagging kicks in.
const SUBSCRIBER_BUFFER: usize = 64;

type TopicMap = Arc<RwLock<HashMap<String, broadcast::Sender<ChannelEvent>>>>;

pub struct EventRouter;

impl EventRouter {
    /// Spawn the router task over the connection's event stream.
    pub fn spawn(mut event_rx: mpsc::Receiver<RealtimeEvent>) -> RouterHandle {
        let topics: TopicMap = Arc::new(RwLock::new(HashMap::new()));
        let task_topics = Arc::clone(&topics);
        let task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                route(event, &task_topics).await;
            }
            debug!("Event router stopped");
        });
        RouterHandle {
            topics,
            task: Arc::new(task),
        }
    }
}

/// Cheap-to-clone handle for registering topic subscriptions.
#[derive(Clone)]
pub struct RouterHandle {
    topics: TopicMap,
    task: Arc<JoinHandle<()>>,
}

impl RouterHandle {
    /// Register a topic and get its event stream.
    ///
    /// Each topic has one logical owner; a second registration for the
    /// same topic is refused.
    pub async fn register(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<ChannelEvent>, RealtimeError> {
        let mut topics = self.topics.write().await;
        if topics.contains_key(topic) {
            return Err(RealtimeError::TopicInUse(topic.to_string()));
        }
        let (tx, rx) = broadcast::channel(SUBSCRIBER_BUFFER);
        topics.insert(topic.to_string(), tx);
        Ok(rx)
    }

    /// Remove a topic. Events for unregistered topics are dropped.
    pub async fn unregister(&self, topic: &str) {
        self.topics.write().await.remove(topic);
    }

    /// Stop the router task. Pending events are dropped.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn deliver(topics: &TopicMap, topic: &str, event: ChannelEvent) {
    let topics = topics.read().await;
    match topics.get(topic) {
        // send only fails when every receiver is gone; the topic is
        // about to be unregistered then, so the event can be dropped.
        Some(tx) => {
            let _ = tx.send(event);
        }
        None => {
            debug!(topic = %topic, "Dropping event for unregistered topic");
        }
    }
}

async fn route(event: RealtimeEvent, topics: &TopicMap) {
    match event {
        RealtimeEvent::Connected => {
            debug!("Realtime connected");
        }
        RealtimeEvent::Disconnected => {
            let topics = topics.read().await;
            for tx in topics.values() {
                let _ = tx.send(ChannelEvent::Disconnected);
            }
        }
        RealtimeEvent::ChannelJoined { topic } => {
            deliver(topics, &topic, ChannelEvent::Joined).await;
        }
        RealtimeEvent::ChannelError { topic, message } => {
            deliver(topics, &topic, ChannelEvent::ChannelError(message)).await;
        }
        RealtimeEvent::Change { topic, event } => {
            deliver(topics, &topic, ChannelEvent::Change(event)).await;
        }
        RealtimeEvent::PresenceState { topic, state } => {
            deliver(topics, &topic, ChannelEvent::PresenceState(state)).await;
        }
        RealtimeEvent::PresenceDiff {
            topic,
            joins,
            leaves,
        } => {
            deliver(topics, &topic, ChannelEvent::PresenceDiff { joins, leaves }).await;
        }
        RealtimeEvent::Error(msg) => {
            warn!(message = %msg, "Realtime transport error");
        }
    }
}
