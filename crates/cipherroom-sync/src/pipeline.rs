use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::{debug, warn};

use cipherroom_crypto::{DecryptionError, RoomKey, open};
use cipherroom_types::{Message, Timestamp};

/// Text shown in place of a message that could not be decrypted.
pub const UNAVAILABLE_PLACEHOLDER: &str = "message unavailable";

/// A wire message together with the result of decrypting it.
///
/// The wire record is kept untouched; a failed decryption leaves
/// `plaintext` empty and records the reason instead of dropping the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub message: Message,
    pub plaintext: Option<String>,
    pub error: Option<DecryptionError>,
}

impl DecryptedMessage {
    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn ordering_key(&self) -> Timestamp {
        self.message.ordering_key()
    }

    pub fn failed(&self) -> bool {
        self.plaintext.is_none()
    }

    /// Plaintext, or the placeholder for a message that failed to decrypt.
    pub fn display_text(&self) -> &str {
        self.plaintext.as_deref().unwrap_or(UNAVAILABLE_PLACEHOLDER)
    }

    /// Sender name for display. Names travel base64-encoded; a value that
    /// does not decode to UTF-8 is shown as sent.
    pub fn sender_display_name(&self) -> Option<String> {
        let raw = self.message.sender_name.as_deref()?;
        let decoded = BASE64
            .decode(raw)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        Some(decoded.unwrap_or_else(|| raw.to_owned()))
    }
}

/// Decrypt one message with the room key. Never fails: errors are recorded
/// on the returned value.
pub fn decrypt(message: &Message, key: &RoomKey) -> DecryptedMessage {
    match open(key, &message.ciphertext) {
        Ok(plaintext) => DecryptedMessage {
            message: message.clone(),
            plaintext: Some(plaintext),
            error: None,
        },
        Err(e) => {
            warn!(message_id = %message.id, error = %e, "message could not be decrypted");
            DecryptedMessage {
                message: message.clone(),
                plaintext: None,
                error: Some(e),
            }
        }
    }
}

/// Decrypt every message independently. Output order matches input order.
pub fn decrypt_all(messages: &[Message], key: &RoomKey) -> Vec<DecryptedMessage> {
    messages.iter().map(|m| decrypt(m, key)).collect()
}

/// Session-scoped decryptor holding the shared room key.
#[derive(Clone)]
pub struct DecryptionPipeline {
    key: Arc<RoomKey>,
}

impl DecryptionPipeline {
    pub fn new(key: Arc<RoomKey>) -> Self {
        Self { key }
    }

    pub fn decrypt_one(&self, message: &Message) -> DecryptedMessage {
        decrypt(message, &self.key)
    }

    /// Decrypt a fetched page on the blocking pool.
    pub async fn decrypt_page(&self, messages: Vec<Message>) -> Vec<DecryptedMessage> {
        if messages.is_empty() {
            return Vec::new();
        }

        let messages = Arc::new(messages);
        let batch = messages.clone();
        let key = self.key.clone();

        let decrypted = tokio::task::spawn_blocking(move || decrypt_all(&batch, &key))
            .await
            .unwrap_or_else(|e| {
                warn!("decrypt task join error: {}, decrypting inline", e);
                decrypt_all(&messages, &self.key)
            });

        let failed = decrypted.iter().filter(|m| m.failed()).count();
        debug!(count = decrypted.len(), failed, "page decrypted");
        decrypted
    }
}
