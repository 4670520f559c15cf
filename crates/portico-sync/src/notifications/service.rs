//! Async notification service: feed consumer plus optimistic mutations.

use std::sync::Arc;

use chrono::Utc;
use portico_common::{ApiError, PorticoError};
use portico_realtime::{ChangeEvent, ChangeFeed, ChannelEvent, RealtimeClient, RouterHandle};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::PortalApi;
use crate::identity::Identity;
use crate::notifications::store::{NotificationStore, INITIAL_FETCH_LIMIT};
use crate::protocol::{tables, Notification};

/// Events emitted for the UI to consume.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Added(Notification),
    Updated(Notification),
    Removed { id: String },
    /// The list was replaced wholesale (initial load or resync).
    Synced { total: usize, unread: usize },
}

/// Maintains the local notification projection for one user.
///
/// The store is mutated only by this service: feed events on the single
/// consumer task, user actions through the mutation methods. All
/// external reads go through the derived accessors.
pub struct NotificationService {
    store: Arc<RwLock<NotificationStore>>,
    api: Arc<dyn PortalApi>,
    user_id: String,
    feed: ChangeFeed,
    task: JoinHandle<()>,
}

impl NotificationService {
    /// Bulk-fetch the initial window, then subscribe to the change feed.
    /// A failed initial fetch is surfaced to the caller.
    pub async fn start(
        client: &RealtimeClient,
        router: &RouterHandle,
        api: Arc<dyn PortalApi>,
        identity: &Identity,
    ) -> Result<(Self, mpsc::Receiver<NotificationEvent>), PorticoError> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let store = Arc::new(RwLock::new(NotificationStore::new()));

        let rows = api
            .fetch_notifications(&identity.user_id, INITIAL_FETCH_LIMIT)
            .await?;
        {
            let mut store = store.write().await;
            store.load(rows);
            let _ = event_tx.try_send(NotificationEvent::Synced {
                total: store.len(),
                unread: store.unread_count(),
            });
        }

        let (feed, feed_rx) = ChangeFeed::open(client, router, tables::NOTIFICATIONS, None).await?;
        let task = tokio::spawn(feed_loop(
            feed_rx,
            Arc::clone(&store),
            Arc::clone(&api),
            identity.user_id.clone(),
            event_tx,
        ));

        Ok((
            Self {
                store,
                api,
                user_id: identity.user_id.clone(),
                feed,
                task,
            },
            event_rx,
        ))
    }

    /// Snapshot of the current list, newest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.store.read().await.notifications().to_vec()
    }

    pub async fn unread_count(&self) -> usize {
        self.store.read().await.unread_count()
    }

    /// Optimistically mark one notification read, then issue the backend
    /// mutation. On failure the local change is rolled back, leaving
    /// state untouched.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), ApiError> {
        let saved = self.store.read().await.clone();
        self.store.write().await.mark_read(id, Utc::now());
        match self.api.mark_notification_read(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.store.write().await = saved;
                Err(e)
            }
        }
    }

    /// Optimistically mark everything read and zero the counter, then
    /// issue the bulk backend mutation scoped to this user's visibility.
    pub async fn mark_all_as_read(&self) -> Result<(), ApiError> {
        let saved = self.store.read().await.clone();
        self.store.write().await.mark_all_read(Utc::now());
        match self.api.mark_all_notifications_read(&self.user_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.store.write().await = saved;
                Err(e)
            }
        }
    }

    /// Optimistically remove a notification, then issue the backend
    /// delete. The eventual feed delete for the same id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let saved = self.store.read().await.clone();
        self.store.write().await.apply_delete(id);
        match self.api.delete_notification(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.store.write().await = saved;
                Err(e)
            }
        }
    }

    /// Close the feed and stop the consumer task. Idempotent.
    pub async fn shutdown(&self) {
        self.feed.close().await;
        self.task.abort();
    }
}

/// Single consumer task applying feed events to the store.
async fn feed_loop(
    mut rx: broadcast::Receiver<ChannelEvent>,
    store: Arc<RwLock<NotificationStore>>,
    api: Arc<dyn PortalApi>,
    user_id: String,
    event_tx: mpsc::Sender<NotificationEvent>,
) {
    loop {
        match rx.recv().await {
            // Every (re)join means missed events may exist: refetch.
            Ok(ChannelEvent::Joined) => {
                resync(&store, api.as_ref(), &user_id, &event_tx).await;
            }
            Ok(ChannelEvent::Change(change)) => {
                apply_change(change, &store, &user_id, &event_tx).await;
            }
            Ok(ChannelEvent::ChannelError(message)) => {
                warn!(message = %message, "Notification feed channel error");
            }
            Ok(ChannelEvent::Disconnected) => {
                debug!("Notification feed disconnected; projection stale until rejoin");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Notification feed lagged; resyncing");
                resync(&store, api.as_ref(), &user_id, &event_tx).await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Notification feed loop stopped");
}

async fn resync(
    store: &Arc<RwLock<NotificationStore>>,
    api: &dyn PortalApi,
    user_id: &str,
    event_tx: &mpsc::Sender<NotificationEvent>,
) {
    match api.fetch_notifications(user_id, INITIAL_FETCH_LIMIT).await {
        Ok(rows) => {
            let mut store = store.write().await;
            store.load(rows);
            let _ = event_tx
                .send(NotificationEvent::Synced {
                    total: store.len(),
                    unread: store.unread_count(),
                })
                .await;
        }
        // Keep the stale projection; the next join or lag will retry.
        Err(e) => warn!(error = %e, "Notification resync failed"),
    }
}

async fn apply_change(
    change: ChangeEvent,
    store: &Arc<RwLock<NotificationStore>>,
    user_id: &str,
    event_tx: &mpsc::Sender<NotificationEvent>,
) {
    match change {
        ChangeEvent::Insert { row } => match serde_json::from_value::<Notification>(row) {
            Ok(row) if row.is_visible_to(user_id) => {
                if store.write().await.apply_insert(row.clone()) {
                    let _ = event_tx.send(NotificationEvent::Added(row)).await;
                }
            }
            Ok(row) => debug!(id = %row.id, "Ignoring insert for another user"),
            Err(e) => debug!(error = %e, "Unparseable notification insert"),
        },
        ChangeEvent::Update { row, .. } => match serde_json::from_value::<Notification>(row) {
            Ok(row) => {
                if store.write().await.apply_update(row.clone()) {
                    let _ = event_tx.send(NotificationEvent::Updated(row)).await;
                }
            }
            Err(e) => debug!(error = %e, "Unparseable notification update"),
        },
        ChangeEvent::Delete { old_row } => {
            match old_row.get("id").and_then(|id| id.as_str()) {
                Some(id) => {
                    if store.write().await.apply_delete(id) {
                        let _ = event_tx
                            .send(NotificationEvent::Removed { id: id.to_string() })
                            .await;
                    }
                }
                None => debug!("Delete event without row id"),
            }
        }
    }
}
