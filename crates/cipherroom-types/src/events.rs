use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Events delivered over a room's live push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RoomEvent {
    /// A new encrypted message was posted to the room
    MessageCreate(Message),

    /// The transport re-established its connection; anything may have been
    /// missed in between
    Reconnected,

    /// The room no longer exists
    RoomDeleted,
}
