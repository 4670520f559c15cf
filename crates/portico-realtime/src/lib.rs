//! Realtime push transport for Portico over Phoenix Channels v1.
//!
//! Provides a generic WebSocket client using `tokio-tungstenite` that
//! handles heartbeats, channel join/leave, presence tracking, row-change
//! subscriptions, and auto-reconnect with backoff. On top of the raw
//! client sit the two subscription primitives the sync layer consumes:
//! [`ChangeFeed`] for row-change streams and [`PresenceChannel`] for
//! ephemeral presence state.

pub mod client;
mod connection;
pub mod feed;
mod handler;
pub mod presence;
pub mod router;
pub mod types;

pub use client::RealtimeClient;
pub use feed::{ChangeFeed, FeedFilter};
pub use presence::PresenceChannel;
pub use router::{EventRouter, RouterHandle};
pub use types::{
    ChangeEvent, ChannelConfig, ChannelEvent, PhoenixMessage, PostgresChangesConfig,
    RealtimeConfig, RealtimeEvent,
};
