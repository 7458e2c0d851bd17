//! Wire and data model shared by the sync engine and the room client.

pub mod api;
pub mod events;
pub mod models;

pub use api::{ApiEnvelope, HistoryPage, HistoryQuery};
pub use events::RoomEvent;
pub use models::{Message, Timestamp};
