//! portico: operator CLI that runs a portal session and tails the
//! notification and presence streams to the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use portico_config::loader;
use portico_sync::{
    tables, Identity, NotificationEvent, PortalSession, PresenceEvent, RestApi,
};

#[derive(Parser)]
#[command(name = "portico", about = "Tail the Portico realtime sync and presence state")]
struct Args {
    /// Path to config.toml (defaults to the platform config directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User id to run the session as (generated when omitted).
    #[arg(long)]
    user_id: Option<String>,

    /// Display name broadcast with presence.
    #[arg(long, default_value = "operator")]
    display_name: String,

    /// Auth token (JWT), if the backend requires one.
    #[arg(long)]
    access_token: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => loader::load_from_path(path),
        None => portico_config::load_config(),
    }
    .expect("Failed to load config");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .init();

    let mut identity = match args.user_id {
        Some(user_id) => Identity::new(user_id, args.display_name),
        None => Identity::generate(args.display_name),
    };
    if let Some(token) = args.access_token {
        identity = identity.with_access_token(token);
    }

    let api = Arc::new(RestApi::new(
        config.api.base_url.clone(),
        config.api.api_key.clone(),
        identity.access_token.clone(),
    ));

    let (mut session, streams) = PortalSession::start(&config, identity, api)
        .await
        .expect("Failed to start portal session");

    // Domain tables: print an invalidation line per change signal.
    for table in [
        tables::DOCUMENTS,
        tables::EVENTS,
        tables::OBJECTIVES,
        tables::COMMENTS,
        tables::REPORTS,
    ] {
        let name = table.to_string();
        session
            .register_refetch(
                table,
                Arc::new(move || println!("~ {name} changed, collaborators should refetch")),
            )
            .await
            .expect("Failed to register table feed");
    }

    let mut notification_rx = streams.notifications;
    let notifications_task = tokio::spawn(async move {
        while let Some(event) = notification_rx.recv().await {
            match event {
                NotificationEvent::Synced { total, unread } => {
                    println!("= notifications synced: {total} loaded, {unread} unread");
                }
                NotificationEvent::Added(n) => {
                    println!("+ [{:?}] {}: {}", n.kind, n.title, n.content);
                }
                NotificationEvent::Updated(n) => {
                    println!("* {} (read: {})", n.title, n.read);
                }
                NotificationEvent::Removed { id } => {
                    println!("- notification {id} removed");
                }
            }
        }
    });

    let presence_task = streams.presence.map(|mut presence_rx| {
        tokio::spawn(async move {
            while let Some(event) = presence_rx.recv().await {
                match event {
                    PresenceEvent::Synced { online, visible } => {
                        println!("= presence synced: {online} online, {visible} visible");
                    }
                    PresenceEvent::UserJoined { user_id } => {
                        println!("> {user_id} joined");
                    }
                    PresenceEvent::UserLeft { user_id } => {
                        println!("< {user_id} left");
                    }
                    PresenceEvent::SettingsChanged { user_id } => {
                        println!("~ visibility settings changed for {user_id}");
                    }
                    PresenceEvent::Disconnected => {
                        println!("! presence disconnected, projection is stale");
                    }
                    PresenceEvent::Error(message) => {
                        println!("! presence error: {message}");
                    }
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");
    tracing::info!("Shutting down");

    session.shutdown().await;
    notifications_task.abort();
    if let Some(task) = presence_task {
        task.abort();
    }
}
