//! REST data-api boundary: bulk reads and mutations.
//!
//! The sync layer talks to the backend's REST endpoint (PostgREST
//! conventions) for everything that is not a push event. [`PortalApi`]
//! is the seam the services depend on; [`RestApi`] is the production
//! implementation.

use async_trait::async_trait;
use portico_common::ApiError;
use tracing::debug;

use crate::protocol::{tables, Notification, PresenceSettings, MAX_CUSTOM_STATUS_LEN};

#[async_trait]
pub trait PortalApi: Send + Sync {
    /// Fetch the `limit` most recent notifications visible to `user_id`
    /// (broadcast rows plus rows targeted at them), newest first.
    async fn fetch_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, ApiError>;

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError>;

    /// Mark every unread notification visible to `user_id` as read.
    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<(), ApiError>;

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError>;

    async fn fetch_presence_settings(&self) -> Result<Vec<PresenceSettings>, ApiError>;

    async fn upsert_presence_settings(&self, settings: &PresenceSettings)
        -> Result<(), ApiError>;
}

/// The visibility predicate shared by `fetch_notifications` and
/// `mark_all_notifications_read`: broadcast rows or rows targeted at the
/// user.
fn visibility_predicate(user_id: &str) -> String {
    format!("or=(target_user_id.is.null,target_user_id.eq.{user_id})")
}

/// Validate a settings row before sending it to the backend.
fn validate_settings(settings: &PresenceSettings) -> Result<(), ApiError> {
    if let Some(status) = &settings.custom_status {
        if status.chars().count() > MAX_CUSTOM_STATUS_LEN {
            return Err(ApiError::InvalidRequest(format!(
                "custom_status exceeds {MAX_CUSTOM_STATUS_LEN} characters"
            )));
        }
    }
    if settings.user_id.is_empty() {
        return Err(ApiError::InvalidRequest("user_id must not be empty".into()));
    }
    Ok(())
}

/// REST client for a PostgREST-style endpoint.
pub struct RestApi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token,
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), table)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = body.chars().take(200).collect::<String>();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PortalApi for RestApi {
    async fn fetch_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Notification>, ApiError> {
        debug!(user_id = %user_id, limit, "Fetching notifications");
        let url = format!(
            "{}?select=*&{}&order=created_at.desc&limit={limit}",
            self.url(tables::NOTIFICATIONS),
            visibility_predicate(user_id),
        );
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response
            .json::<Vec<Notification>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        let url = format!("{}?id=eq.{id}", self.url(tables::NOTIFICATIONS));
        let response = self
            .authed(self.http.patch(&url))
            .json(&serde_json::json!({ "read": true }))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<(), ApiError> {
        let url = format!(
            "{}?read=eq.false&{}",
            self.url(tables::NOTIFICATIONS),
            visibility_predicate(user_id),
        );
        let response = self
            .authed(self.http.patch(&url))
            .json(&serde_json::json!({ "read": true }))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        let url = format!("{}?id=eq.{id}", self.url(tables::NOTIFICATIONS));
        let response = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn fetch_presence_settings(&self) -> Result<Vec<PresenceSettings>, ApiError> {
        let url = format!("{}?select=*", self.url(tables::PRESENCE_SETTINGS));
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response
            .json::<Vec<PresenceSettings>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn upsert_presence_settings(
        &self,
        settings: &PresenceSettings,
    ) -> Result<(), ApiError> {
        validate_settings(settings)?;
        let response = self
            .authed(self.http.post(self.url(tables::PRESENCE_SETTINGS)))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[settings])
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check_status(response).await?;
        Ok(())
    }
}

/// In-memory fake used by service tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    pub struct MockApi {
        pub notifications: Mutex<Vec<Notification>>,
        pub settings: Mutex<Vec<PresenceSettings>>,
        pub fail_mutations: AtomicBool,
        pub fail_fetches: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockApi {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn fail_mutations(&self, fail: bool) {
            self.fail_mutations.store(fail, Ordering::SeqCst);
        }

        pub fn fail_fetches(&self, fail: bool) {
            self.fail_fetches.store(fail, Ordering::SeqCst);
        }

        fn check_fetch(&self) -> Result<(), ApiError> {
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(ApiError::Network("simulated fetch failure".into()));
            }
            Ok(())
        }

        fn record(&self, call: impl Into<String>) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(call.into());
            if self.fail_mutations.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: 500,
                    body: "simulated failure".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PortalApi for MockApi {
        async fn fetch_notifications(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<Notification>, ApiError> {
            self.check_fetch()?;
            let rows = self.notifications.lock().unwrap();
            let mut visible: Vec<Notification> = rows
                .iter()
                .filter(|n| n.is_visible_to(user_id))
                .cloned()
                .collect();
            visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            visible.truncate(limit);
            Ok(visible)
        }

        async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
            self.record(format!("mark_read:{id}"))?;
            let mut rows = self.notifications.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|n| n.id == id) {
                row.read = true;
            }
            Ok(())
        }

        async fn mark_all_notifications_read(&self, user_id: &str) -> Result<(), ApiError> {
            self.record(format!("mark_all_read:{user_id}"))?;
            let mut rows = self.notifications.lock().unwrap();
            for row in rows.iter_mut().filter(|n| n.is_visible_to(user_id)) {
                row.read = true;
            }
            Ok(())
        }

        async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
            self.record(format!("delete:{id}"))?;
            self.notifications.lock().unwrap().retain(|n| n.id != id);
            Ok(())
        }

        async fn fetch_presence_settings(&self) -> Result<Vec<PresenceSettings>, ApiError> {
            self.check_fetch()?;
            Ok(self.settings.lock().unwrap().clone())
        }

        async fn upsert_presence_settings(
            &self,
            settings: &PresenceSettings,
        ) -> Result<(), ApiError> {
            validate_settings(settings)?;
            self.record(format!("upsert_settings:{}", settings.user_id))?;
            let mut rows = self.settings.lock().unwrap();
            match rows.iter_mut().find(|s| s.user_id == settings.user_id) {
                Some(row) => *row = settings.clone(),
                None => rows.push(settings.clone()),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_predicate_covers_broadcast_and_targeted() {
        assert_eq!(
            visibility_predicate("user-1"),
            "or=(target_user_id.is.null,target_user_id.eq.user-1)"
        );
    }

    #[test]
    fn validate_settings_rejects_long_status() {
        let settings = PresenceSettings {
            user_id: "user-1".into(),
            show_presence: true,
            custom_status: Some("x".repeat(MAX_CUSTOM_STATUS_LEN + 1)),
        };
        assert!(matches!(
            validate_settings(&settings),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_settings_accepts_max_length_status() {
        let settings = PresenceSettings {
            user_id: "user-1".into(),
            show_presence: false,
            custom_status: Some("x".repeat(MAX_CUSTOM_STATUS_LEN)),
        };
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn rest_url_joins_without_double_slash() {
        let api = RestApi::new("https://portal.example.com/rest/v1/", "key", None);
        assert_eq!(
            api.url(tables::NOTIFICATIONS),
            "https://portal.example.com/rest/v1/notifications"
        );
    }
}
