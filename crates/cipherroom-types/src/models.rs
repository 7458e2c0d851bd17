use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// A room message as the server stores and delivers it.
/// The server only ever sees ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// JSON encryption envelope, see `cipherroom_crypto::envelope`.
    #[serde(alias = "encryption")]
    pub ciphertext: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl Message {
    /// Timestamp used to sort and paginate messages: `updated_at`, falling
    /// back to `created_at`.
    pub fn ordering_key(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }
}
