//! Table-change fan-out for the domain CRUD collaborators.
//!
//! Deliberately coarse: one unfiltered feed per registered table, and the
//! registered callback fires on every event regardless of kind, without
//! inspecting payloads. Collaborators refetch if they care; calling them
//! more often than strictly necessary is part of the contract.

use std::sync::Arc;

use portico_common::RealtimeError;
use portico_realtime::{ChangeFeed, ChannelEvent, RealtimeClient, RouterHandle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback invoked with no arguments whenever a table may have changed.
pub type OnChange = Arc<dyn Fn() + Send + Sync>;

struct Registration {
    table: String,
    feed: ChangeFeed,
    task: JoinHandle<()>,
}

pub struct SyncCoordinator {
    client: RealtimeClient,
    router: RouterHandle,
    registrations: Vec<Registration>,
}

impl SyncCoordinator {
    pub fn new(client: &RealtimeClient, router: &RouterHandle) -> Self {
        Self {
            client: client.clone(),
            router: router.clone(),
            registrations: Vec::new(),
        }
    }

    /// Open an unfiltered feed for `table` and invoke `on_change` on
    /// every event. Rejoins and lag also fire the callback, since either
    /// means changes may have been missed.
    pub async fn register(
        &mut self,
        table: &str,
        on_change: OnChange,
    ) -> Result<(), RealtimeError> {
        let (feed, mut rx) = ChangeFeed::open(&self.client, &self.router, table, None).await?;
        let task_table = table.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::Change(_)) | Ok(ChannelEvent::Joined) => on_change(),
                    Ok(ChannelEvent::ChannelError(message)) => {
                        warn!(table = %task_table, message = %message, "Sync feed channel error");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => on_change(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(table = %task_table, "Sync feed loop stopped");
        });
        self.registrations.push(Registration {
            table: table.to_string(),
            feed,
            task,
        });
        Ok(())
    }

    /// Tables currently registered, in registration order.
    pub fn tables(&self) -> Vec<&str> {
        self.registrations.iter().map(|r| r.table.as_str()).collect()
    }

    /// Close every feed and stop the forwarder tasks. Idempotent: a
    /// second call finds nothing registered.
    pub async fn shutdown(&mut self) {
        for registration in self.registrations.drain(..) {
            registration.feed.close().await;
            registration.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use portico_realtime::{ChangeEvent, EventRouter, RealtimeConfig, RealtimeEvent};
    use tokio::sync::mpsc;

    use super::*;

    fn test_transport() -> (RealtimeClient, RouterHandle, mpsc::Sender<RealtimeEvent>) {
        let config = RealtimeConfig {
            url: "ws://127.0.0.1:9".into(),
            reconnect_delay_secs: 3600,
            max_reconnect_delay_secs: 3600,
            ..Default::default()
        };
        let (client, _client_rx) = RealtimeClient::connect(config);
        let (tx, rx) = mpsc::channel(64);
        let router = EventRouter::spawn(rx);
        (client, router, tx)
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "callback count stuck at {} (wanted {expected})",
            counter.load(Ordering::SeqCst)
        );
    }

    fn change_event(topic: &str, kind: &str) -> RealtimeEvent {
        let event = match kind {
            "insert" => ChangeEvent::Insert {
                row: serde_json::json!({"id": "r1"}),
            },
            "update" => ChangeEvent::Update {
                row: serde_json::json!({"id": "r1"}),
                old_row: None,
            },
            _ => ChangeEvent::Delete {
                old_row: serde_json::json!({"id": "r1"}),
            },
        };
        RealtimeEvent::Change {
            topic: topic.into(),
            event,
        }
    }

    #[tokio::test]
    async fn callback_fires_for_every_event_kind() {
        let (client, router, tx) = test_transport();
        let mut coordinator = SyncCoordinator::new(&client, &router);

        let counter = Arc::new(AtomicUsize::new(0));
        let cb_counter = Arc::clone(&counter);
        coordinator
            .register("documents", Arc::new(move || {
                cb_counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        tx.send(change_event("feed:documents", "insert")).await.unwrap();
        tx.send(change_event("feed:documents", "update")).await.unwrap();
        tx.send(change_event("feed:documents", "delete")).await.unwrap();

        wait_for(&counter, 3).await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn rejoin_fires_callback() {
        let (client, router, tx) = test_transport();
        let mut coordinator = SyncCoordinator::new(&client, &router);

        let counter = Arc::new(AtomicUsize::new(0));
        let cb_counter = Arc::clone(&counter);
        coordinator
            .register("reports", Arc::new(move || {
                cb_counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        tx.send(RealtimeEvent::ChannelJoined {
            topic: "feed:reports".into(),
        })
        .await
        .unwrap();

        wait_for(&counter, 1).await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let (client, router, tx) = test_transport();
        let mut coordinator = SyncCoordinator::new(&client, &router);

        let docs = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(AtomicUsize::new(0));
        let docs_cb = Arc::clone(&docs);
        let events_cb = Arc::clone(&events);
        coordinator
            .register("documents", Arc::new(move || {
                docs_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        coordinator
            .register("events", Arc::new(move || {
                events_cb.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        assert_eq!(coordinator.tables(), vec!["documents", "events"]);

        tx.send(change_event("feed:events", "insert")).await.unwrap();

        wait_for(&events, 1).await;
        assert_eq!(docs.load(Ordering::SeqCst), 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_table_registration_is_refused() {
        let (client, router, _tx) = test_transport();
        let mut coordinator = SyncCoordinator::new(&client, &router);

        coordinator
            .register("documents", Arc::new(|| {}))
            .await
            .unwrap();
        let second = coordinator.register("documents", Arc::new(|| {})).await;
        assert!(matches!(second, Err(RealtimeError::TopicInUse(_))));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_frees_topics() {
        let (client, router, _tx) = test_transport();
        let mut coordinator = SyncCoordinator::new(&client, &router);
        coordinator
            .register("documents", Arc::new(|| {}))
            .await
            .unwrap();

        coordinator.shutdown().await;
        coordinator.shutdown().await;

        // The topic is free again after teardown.
        assert!(coordinator
            .register("documents", Arc::new(|| {}))
            .await
            .is_ok());
        coordinator.shutdown().await;
    }
}
