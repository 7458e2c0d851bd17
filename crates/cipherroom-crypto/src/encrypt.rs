use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng, generic_array::GenericArray},
};
use anyhow::{Result, anyhow, bail};

use crate::keys::RoomKey;

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM output with the authentication tag kept apart from the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub body: Vec<u8>,
    pub tag: Vec<u8>,
}

fn cipher(key: &RoomKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext` under a fresh random nonce.
pub fn seal_detached(key: &RoomKey, plaintext: &[u8]) -> Result<Sealed> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut body = plaintext.to_vec();

    let tag = cipher(key)
        .encrypt_in_place_detached(&nonce, b"", &mut body)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(Sealed {
        nonce: nonce.to_vec(),
        body,
        tag: tag.to_vec(),
    })
}

/// Verify and decrypt. Fails on wrong key, tampering or bad nonce/tag sizes.
pub fn open_detached(key: &RoomKey, nonce: &[u8], mut body: Vec<u8>, tag: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        bail!("Invalid nonce length: {}", nonce.len());
    }
    if tag.len() != TAG_SIZE {
        bail!("Invalid tag length: {}", tag.len());
    }

    cipher(key)
        .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut body, GenericArray::from_slice(tag))
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(body)
}
