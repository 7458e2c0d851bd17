use anyhow::{Context, Result};

use cipherroom_sync::SyncConfig;

/// Everything the client binary reads from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub ws_url: String,
    pub room_id: String,
    pub token: Option<String>,
    pub connect_password: String,
    /// Older pages to load right after the session opens.
    pub preload_pages: u32,
    pub sync: SyncConfig,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let server_url =
            std::env::var("CIPHERROOM_SERVER_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let ws_url = std::env::var("CIPHERROOM_WS_URL").unwrap_or_else(|_| default_ws_url(&server_url));
        let room_id = std::env::var("CIPHERROOM_ROOM_ID").context("CIPHERROOM_ROOM_ID is not set")?;
        let connect_password = std::env::var("CIPHERROOM_CONNECT_PASSWORD")
            .context("CIPHERROOM_CONNECT_PASSWORD is not set")?;
        let token = std::env::var("CIPHERROOM_TOKEN").ok().filter(|t| !t.is_empty());
        let preload_pages: u32 = std::env::var("CIPHERROOM_PRELOAD_PAGES")
            .unwrap_or_else(|_| "0".into())
            .parse()
            .context("CIPHERROOM_PRELOAD_PAGES must be a number")?;

        Ok(Self {
            server_url,
            ws_url,
            room_id,
            token,
            connect_password,
            preload_pages,
            sync: SyncConfig::from_env()?,
        })
    }
}

/// `http(s)://host` -> `ws(s)://host/gateway`
fn default_ws_url(server_url: &str) -> String {
    let base = server_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}/gateway", base)
}
