use serde::{Deserialize, Serialize};

/// The local user's identity for channel keys and row ownership.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    /// Optional auth JWT for authenticated connections.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            access_token: None,
        }
    }

    /// Anonymous identity with a generated user id.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self::new(portico_common::new_id(), display_name)
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}
