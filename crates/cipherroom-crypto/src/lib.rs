/// Cipherroom Crypto Library
///
/// Every member of a room shares one symmetric key derived from the room's
/// connect password. Messages are sealed with AES-256-GCM into a JSON
/// envelope that the server stores and relays without being able to read.

#[cfg(feature = "client")]
pub mod encrypt;
#[cfg(feature = "client")]
pub mod envelope;

pub mod keys;

#[cfg(feature = "client")]
pub use envelope::{DecryptionError, open, seal};
pub use keys::{KeyError, RoomKey};
