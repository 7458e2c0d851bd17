use thiserror::Error;

/// Failure of a single history fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network failure, timeout or 5xx. The cursor did not move; retrying is safe.
    #[error("transport error: {0}")]
    Transport(String),

    /// The room session is no longer valid. Re-authenticate before retrying.
    #[error("room session rejected: {0}")]
    Auth(String),

    /// The server answered with something that breaks the pagination contract.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Map a non-success HTTP status of the history API to a fetch error.
pub fn classify_http_status(status: u16, detail: impl Into<String>) -> FetchError {
    let detail = format!("HTTP {}: {}", status, detail.into());
    match status {
        401 | 403 => FetchError::Auth(detail),
        408 | 429 | 500..=599 => FetchError::Transport(detail),
        _ => FetchError::Protocol(detail),
    }
}

/// Errors surfaced by [`crate::RoomSession`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The result belongs to an epoch that has since been reset; it was discarded.
    #[error("result discarded: room session was reset")]
    Stale,

    #[error("room session is closed")]
    Closed,

    #[error("room task queue is shut down")]
    QueueClosed,
}
