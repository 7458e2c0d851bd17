use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encrypt::{NONCE_SIZE, TAG_SIZE, open_detached, seal_detached};
use crate::keys::RoomKey;

pub const CIPHER_NAME: &str = "AES-256-GCM";

/// Why a single message could not be turned back into text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionError {
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("authentication failed (wrong room key or tampered message)")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

/// Wire form of `Message.ciphertext`: base64 fields with the GCM tag kept
/// apart from the ciphertext body.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cipher: Option<String>,
    ciphertext: String,
    iv: String,
    mac: String,
}

/// Encrypt `plaintext` under the room key into a JSON envelope string.
pub fn seal(key: &RoomKey, plaintext: &str) -> anyhow::Result<String> {
    let sealed = seal_detached(key, plaintext.as_bytes())?;

    let envelope = Envelope {
        cipher: Some(CIPHER_NAME.to_string()),
        ciphertext: BASE64.encode(&sealed.body),
        iv: BASE64.encode(&sealed.nonce),
        mac: BASE64.encode(&sealed.tag),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decrypt a JSON envelope string produced by [`seal`].
pub fn open(key: &RoomKey, envelope: &str) -> Result<String, DecryptionError> {
    let envelope: Envelope = serde_json::from_str(envelope)
        .map_err(|e| DecryptionError::Malformed(format!("envelope: {}", e)))?;

    if let Some(cipher) = envelope.cipher.as_deref() {
        if !cipher.eq_ignore_ascii_case(CIPHER_NAME) {
            return Err(DecryptionError::Malformed(format!("unsupported cipher {}", cipher)));
        }
    }

    let body = decode_field("ciphertext", &envelope.ciphertext)?;
    let iv = decode_field("iv", &envelope.iv)?;
    let mac = decode_field("mac", &envelope.mac)?;

    if iv.len() != NONCE_SIZE {
        return Err(DecryptionError::Malformed(format!("iv is {} bytes", iv.len())));
    }
    if mac.len() != TAG_SIZE {
        return Err(DecryptionError::Malformed(format!("mac is {} bytes", mac.len())));
    }

    let plaintext = open_detached(key, &iv, body, &mac)
        .map_err(|_| DecryptionError::Authentication)?;

    String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, DecryptionError> {
    BASE64
        .decode(value)
        .map_err(|e| DecryptionError::Malformed(format!("{}: {}", name, e)))
}
