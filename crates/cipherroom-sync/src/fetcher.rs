use std::future::Future;
use std::time::Instant;

use tracing::{debug, warn};

use cipherroom_types::{HistoryPage, HistoryQuery, Message, Timestamp};

use crate::config::SyncConfig;
use crate::error::FetchError;

/// The history read API the engine consumes.
///
/// `query.cursor = None` asks for the newest page; otherwise for up to
/// `query.page_size` messages whose ordering key is strictly less than the
/// cursor.
pub trait HistorySource: Send + Sync {
    fn fetch(&self, query: HistoryQuery) -> impl Future<Output = Result<HistoryPage, FetchError>> + Send;
}

/// Fetches bounded pages of history backward in time and enforces that every
/// page makes strict backward progress.
pub struct HistoryCursorFetcher<S> {
    source: S,
    config: SyncConfig,
}

impl<S: HistorySource> HistoryCursorFetcher<S> {
    pub fn new(source: S, config: SyncConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch one page older than `cursor` (or the newest page).
    ///
    /// The returned page is ordered oldest -> newest. When `has_next_page`
    /// is set, `next_cursor` is strictly less than `cursor`.
    pub async fn fetch_page(
        &self,
        cursor: Option<Timestamp>,
        page_size: u32,
    ) -> Result<HistoryPage, FetchError> {
        let query = HistoryQuery {
            cursor,
            page_size: self.config.bounded_page_size(page_size),
        };
        let started = Instant::now();

        let mut page = self.source.fetch(query).await.inspect_err(|e| {
            warn!(cursor = ?cursor, error = %e, "history fetch failed");
        })?;

        normalize_page(&mut page, cursor).inspect_err(|e| {
            warn!(cursor = ?cursor, error = %e, "history page rejected");
        })?;

        debug!(
            cursor = ?cursor,
            page_size = query.page_size,
            fetched = page.list.len(),
            has_next_page = page.has_next_page,
            total = page.total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "history page fetched"
        );

        Ok(page)
    }
}

/// Order the page oldest -> newest and check the cursor contract.
fn normalize_page(page: &mut HistoryPage, cursor: Option<Timestamp>) -> Result<(), FetchError> {
    page.list.sort_by(|a, b| {
        a.ordering_key()
            .cmp(&b.ordering_key())
            .then_with(|| a.id.cmp(&b.id))
    });

    if let (Some(cursor), Some(newest)) = (cursor, page.newest_key()) {
        if newest >= cursor {
            return Err(FetchError::Protocol(format!(
                "page contains a message at {} which is not older than cursor {}",
                newest, cursor
            )));
        }
    }

    if !page.has_next_page {
        page.next_cursor = None;
        return Ok(());
    }

    let next = page
        .next_cursor
        .or_else(|| page.list.first().map(Message::ordering_key))
        .ok_or_else(|| FetchError::Protocol("page has more history but no cursor".into()))?;

    if let Some(cursor) = cursor {
        if next >= cursor {
            return Err(FetchError::Protocol(format!(
                "cursor did not move backward ({} -> {})",
                cursor, next
            )));
        }
    }

    page.next_cursor = Some(next);
    Ok(())
}
