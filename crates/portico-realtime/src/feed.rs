//! Change feed: a row-change subscription scoped to one table.

use std::sync::atomic::{AtomicBool, Ordering};

use portico_common::RealtimeError;
use tokio::sync::broadcast;

use crate::client::RealtimeClient;
use crate::router::RouterHandle;
use crate::types::{ChannelConfig, ChannelEvent, PostgresChangesConfig};

/// Server-side row filter: `column = value`.
#[derive(Debug, Clone)]
pub struct FeedFilter {
    pub column: String,
    pub value: String,
}

impl FeedFilter {
    fn to_query(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }
}

/// Topic name for a table subscription. Filtered and unfiltered feeds on
/// the same table get distinct topics so their streams stay independent.
fn feed_topic(table: &str, filter: Option<&FeedFilter>) -> String {
    match filter {
        Some(f) => format!("feed:{table}:{}.{}", f.column, f.value),
        None => format!("feed:{table}"),
    }
}

/// An open row-change subscription.
///
/// Events arrive on the receiver returned by [`ChangeFeed::open`]:
/// `Joined` after every successful (re)join (the consumer's cue to
/// refetch), `Change` for row events, `Disconnected` on transport drop.
/// Delivery is at-least-once; consumers apply idempotently.
pub struct ChangeFeed {
    client: RealtimeClient,
    router: RouterHandle,
    topic: String,
    closed: AtomicBool,
}

impl ChangeFeed {
    /// Join a feed channel for `table`, optionally filtered server-side.
    pub async fn open(
        client: &RealtimeClient,
        router: &RouterHandle,
        table: &str,
        filter: Option<FeedFilter>,
    ) -> Result<(Self, broadcast::Receiver<ChannelEvent>), RealtimeError> {
        let topic = feed_topic(table, filter.as_ref());
        let rx = router.register(&topic).await?;
        let config = ChannelConfig {
            presence_key: None,
            postgres_changes: vec![PostgresChangesConfig {
                table: table.to_string(),
                filter: filter.map(|f| f.to_query()),
            }],
        };
        client.join_channel(&topic, config).await;
        Ok((
            Self {
                client: client.clone(),
                router: router.clone(),
                topic,
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Leave the channel and drop the subscription. Idempotent; later
    /// events for the topic are discarded by the router.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.leave_channel(&self.topic).await;
        self.router.unregister(&self.topic).await;
    }
}
