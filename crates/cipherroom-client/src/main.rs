mod config;
mod live;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use cipherroom_crypto::RoomKey;
use cipherroom_sync::{HttpHistorySource, RoomSession, SessionUpdate, UpdateReason};

use crate::config::ClientConfig;
use crate::live::LiveFeed;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cipherroom=debug".into()),
        )
        .init();

    // Config
    let config = ClientConfig::from_env()?;
    let key = Arc::new(RoomKey::from_connect_password(&config.room_id, &config.connect_password)?);

    // History source + session
    let source = HttpHistorySource::new(
        &config.server_url,
        &config.room_id,
        config.token.clone(),
        &config.sync,
    )?;
    info!("Opening room {} via {}", config.room_id, source.endpoint());

    let session = RoomSession::open(config.sync, config.room_id.clone(), source, key).await?;
    session.on_update(log_update);
    info!(
        "Room {} open: {} messages loaded, first item index {}",
        config.room_id,
        session.len(),
        session.first_item_index()
    );

    for _ in 0..config.preload_pages {
        if !session.has_older() {
            break;
        }
        if let Err(e) = session.load_older_and_wait().await {
            warn!("Preloading older history stopped: {}", e);
            break;
        }
    }

    if let Some(latest) = session.snapshot().last() {
        let sender = latest
            .sender_display_name()
            .unwrap_or_else(|| latest.message.sender_id.clone());
        info!("Latest message from {}: {}", sender, latest.display_text());
    }

    // Live feed
    let (tx, rx) = mpsc::channel(256);
    let feed = LiveFeed::new(&config.ws_url, &config.room_id, config.token.as_deref())?;
    tokio::spawn(feed.run(tx));
    let consumer = session.attach_live(rx);

    tokio::select! {
        _ = consumer => info!("Room {} closed", config.room_id),
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    session.close();
    Ok(())
}

fn log_update(update: &SessionUpdate) {
    match update.reason {
        UpdateReason::Closed => info!("Room session closed"),
        reason => info!(
            epoch = update.epoch,
            len = update.len,
            first_item_index = update.first_item_index,
            "timeline updated ({:?})",
            reason
        ),
    }
}
