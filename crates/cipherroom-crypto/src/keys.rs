use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

pub const KEY_SIZE: usize = 32;

const ROOM_KEY_INFO: &[u8] = b"cipherroom-room-key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("connect password is empty")]
    EmptyPassword,

    #[error("invalid key encoding: {0}")]
    Encoding(String),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    Length(usize),

    #[error("key derivation failed")]
    Derivation,
}

/// 256-bit symmetric key shared by everyone in a room.
///
/// Held in memory for the lifetime of a room session only. `Debug` never
/// prints key material and the bytes are zeroed on drop.
pub struct RoomKey {
    bytes: [u8; KEY_SIZE],
}

impl RoomKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Generate a random key (used when creating a room).
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Derive the room key from the connect password handed out with an
    /// invitation.
    ///
    /// A 64-character hex password already is the key. Anything else is
    /// stretched with HKDF-SHA256, salted with the room id so equal
    /// passwords in different rooms give different keys.
    pub fn from_connect_password(room_id: &str, password: &str) -> Result<Self, KeyError> {
        let password = password.trim();
        if password.is_empty() {
            return Err(KeyError::EmptyPassword);
        }

        if password.len() == KEY_SIZE * 2 && password.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Self::from_hex(password);
        }

        let hk = Hkdf::<Sha256>::new(Some(room_id.as_bytes()), password.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(ROOM_KEY_INFO, &mut bytes)
            .map_err(|_| KeyError::Derivation)?;
        Ok(Self { bytes })
    }

    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(encoded).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::from_vec(bytes)
    }

    /// Decode a base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::from_vec(bytes)
    }

    /// Encode the key to base64 for display/sharing.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    fn from_vec(bytes: Vec<u8>) -> Result<Self, KeyError> {
        let len = bytes.len();
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| KeyError::Length(len))?;
        Ok(Self { bytes })
    }
}

impl fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomKey(..)")
    }
}

impl Drop for RoomKey {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}
