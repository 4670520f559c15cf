//! Session lifecycle: one owned object wiring the transport, the
//! services, and the coordinator.
//!
//! A session is started per signed-in user and consumed on shutdown;
//! there is no process-wide singleton. A new session always re-runs the
//! bulk fetches, so state never leaks across logins.

use std::sync::Arc;

use portico_common::{PorticoError, RealtimeError};
use portico_config::PorticoConfig;
use portico_realtime::{EventRouter, RealtimeClient, RealtimeConfig, RouterHandle};
use tokio::sync::mpsc;
use tracing::info;

use crate::api::PortalApi;
use crate::coordinator::{OnChange, SyncCoordinator};
use crate::identity::Identity;
use crate::notifications::{NotificationEvent, NotificationService};
use crate::presence::{PresenceEvent, PresenceService};

/// UI-facing event streams produced by a session.
pub struct SessionStreams {
    pub notifications: mpsc::Receiver<NotificationEvent>,
    /// Absent when presence is disabled in the config.
    pub presence: Option<mpsc::Receiver<PresenceEvent>>,
}

pub struct PortalSession {
    client: RealtimeClient,
    router: RouterHandle,
    notifications: NotificationService,
    presence: Option<PresenceService>,
    coordinator: SyncCoordinator,
}

impl PortalSession {
    /// Connect the transport and start every service. Failed bulk
    /// fetches surface here and leave nothing running.
    pub async fn start(
        config: &PorticoConfig,
        identity: Identity,
        api: Arc<dyn PortalApi>,
    ) -> Result<(Self, SessionStreams), PorticoError> {
        let realtime_config = RealtimeConfig {
            url: config.realtime.url.clone(),
            api_key: config.realtime.api_key.clone(),
            access_token: identity.access_token.clone(),
            heartbeat_interval_secs: config.realtime.heartbeat_interval_secs,
            reconnect_delay_secs: config.realtime.reconnect_delay_secs,
            max_reconnect_delay_secs: config.realtime.max_reconnect_delay_secs,
        };
        let (client, event_rx) = RealtimeClient::connect(realtime_config);
        let router = EventRouter::spawn(event_rx);

        let started = Self::start_services(config, &identity, api, &client, &router).await;
        match started {
            Ok((notifications, notification_rx, presence, presence_rx)) => {
                info!(user_id = %identity.user_id, "Portal session started");
                let coordinator = SyncCoordinator::new(&client, &router);
                Ok((
                    Self {
                        client,
                        router,
                        notifications,
                        presence,
                        coordinator,
                    },
                    SessionStreams {
                        notifications: notification_rx,
                        presence: presence_rx,
                    },
                ))
            }
            Err(e) => {
                router.shutdown();
                client.disconnect().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    async fn start_services(
        config: &PorticoConfig,
        identity: &Identity,
        api: Arc<dyn PortalApi>,
        client: &RealtimeClient,
        router: &RouterHandle,
    ) -> Result<
        (
            NotificationService,
            mpsc::Receiver<NotificationEvent>,
            Option<PresenceService>,
            Option<mpsc::Receiver<PresenceEvent>>,
        ),
        PorticoError,
    > {
        let (notifications, notification_rx) =
            NotificationService::start(client, router, Arc::clone(&api), identity).await?;

        let (presence, presence_rx) = if config.presence.enabled {
            let (service, rx) = PresenceService::start(
                client,
                router,
                api,
                identity,
                &config.presence.room,
                config.presence.retrack_interval_secs,
            )
            .await?;
            (Some(service), Some(rx))
        } else {
            (None, None)
        };

        Ok((notifications, notification_rx, presence, presence_rx))
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    /// `None` when presence is disabled in the config.
    pub fn presence(&self) -> Option<&PresenceService> {
        self.presence.as_ref()
    }

    /// Register a domain-table refetch callback with the coordinator.
    pub async fn register_refetch(
        &mut self,
        table: &str,
        on_change: OnChange,
    ) -> Result<(), RealtimeError> {
        self.coordinator.register(table, on_change).await
    }

    /// Tear everything down exactly once: the session is consumed, so a
    /// later session must re-run the bulk fetches.
    pub async fn shutdown(mut self) {
        if let Some(presence) = &self.presence {
            presence.shutdown().await;
        }
        self.notifications.shutdown().await;
        self.coordinator.shutdown().await;
        self.client.disconnect().await;
        self.router.shutdown();
        info!("Portal session stopped");
    }
}
