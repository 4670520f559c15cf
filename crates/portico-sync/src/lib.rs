//! Portico sync layer: server-authoritative notifications, ephemeral
//! presence, and table-change fan-out for one portal session.
//!
//! The transport (Phoenix channels over WebSocket) lives in
//! `portico-realtime`; this crate owns the domain projections built on
//! top of it and the REST boundary used for bulk reads and mutations.

pub mod api;
pub mod coordinator;
pub mod identity;
pub mod notifications;
pub mod presence;
pub mod protocol;
pub mod session;

pub use api::{PortalApi, RestApi};
pub use coordinator::{OnChange, SyncCoordinator};
pub use identity::Identity;
pub use notifications::{NotificationEvent, NotificationService, NotificationStore};
pub use presence::{PresenceEvent, PresenceService, PresenceTracker};
pub use protocol::{
    tables, Notification, NotificationKind, PresenceRecord, PresenceSettings,
    MAX_CUSTOM_STATUS_LEN,
};
pub use session::{PortalSession, SessionStreams};
