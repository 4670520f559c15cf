//! Notification sync: local projection of the server-pushed feed.

pub mod service;
pub mod store;

pub use service::{NotificationEvent, NotificationService};
pub use store::NotificationStore;
