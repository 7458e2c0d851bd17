//! Message synchronization engine for an end-to-end encrypted chat room.
//!
//! Merges a live push stream with cursor-based backward pagination of
//! history, decrypts every message with the room key, and keeps the
//! virtualized-list anchor stable while older pages are prepended.

pub mod anchor;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod timeline;

pub use anchor::{AnchorPhase, ScrollAnchorTracker};
pub use config::SyncConfig;
pub use error::{FetchError, SessionError, classify_http_status};
pub use fetcher::{HistoryCursorFetcher, HistorySource};
pub use http::HttpHistorySource;
pub use memory::MemoryHistory;
pub use pipeline::{DecryptedMessage, DecryptionPipeline, UNAVAILABLE_PLACEHOLDER, decrypt, decrypt_all};
pub use queue::SerialTaskQueue;
pub use session::{LoadOutcome, LoadReceiver, RoomSession, SessionUpdate, UpdateCallback, UpdateReason};
pub use timeline::{IngestOutcome, LiveMergeStream};
