use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use cipherroom_types::RoomEvent;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// WebSocket push channel for one room. Text frames carry `RoomEvent` JSON.
pub struct LiveFeed {
    url: String,
    reconnect_delay: Duration,
}

enum Disconnect {
    /// Connection dropped; dial again.
    Retry,
    /// Receiver gone or room deleted.
    Stop,
}

impl LiveFeed {
    /// `room` and `token` are appended as percent-encoded query parameters.
    pub fn new(ws_url: &str, room_id: &str, token: Option<&str>) -> Result<Self, url::ParseError> {
        let mut params = vec![("room", room_id)];
        if let Some(token) = token {
            params.push(("token", token));
        }
        let url = Url::parse_with_params(ws_url, &params)?;

        Ok(Self {
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forward events into `tx` until the receiver is dropped or the room is
    /// deleted. Every successful reconnect is announced with
    /// `RoomEvent::Reconnected` before any event from the new connection.
    pub async fn run(self, tx: mpsc::Sender<RoomEvent>) {
        let mut connected_before = false;

        loop {
            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((mut stream, _)) => {
                    info!("live channel connected");
                    if connected_before && tx.send(RoomEvent::Reconnected).await.is_err() {
                        return;
                    }
                    connected_before = true;

                    if let Disconnect::Stop = pump(&mut stream, &tx).await {
                        return;
                    }
                    info!("live channel disconnected");
                }
                Err(e) => warn!(error = %e, "live channel connect failed"),
            }

            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}

async fn pump<S, E>(frames: &mut S, tx: &mpsc::Sender<RoomEvent>) -> Disconnect
where
    S: futures_util::Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = frames.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "live channel read failed");
                break;
            }
        };

        let Some(event) = parse_event(&text) else {
            continue;
        };
        let deleted = matches!(event, RoomEvent::RoomDeleted);
        if tx.send(event).await.is_err() || deleted {
            return Disconnect::Stop;
        }
    }
    Disconnect::Retry
}

fn parse_event(text: &str) -> Option<RoomEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "ignoring unrecognised live frame");
            None
        }
    }
}
