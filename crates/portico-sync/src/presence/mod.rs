//! Presence: ephemeral who-is-online state gated by persisted
//! visibility settings.

pub mod service;
pub mod tracker;

pub use service::{PresenceEvent, PresenceService};
pub use tracker::PresenceTracker;
