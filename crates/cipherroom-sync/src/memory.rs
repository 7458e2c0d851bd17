use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cipherroom_types::{HistoryPage, HistoryQuery, Message};

use crate::error::FetchError;
use crate::fetcher::HistorySource;

/// In-process history store implementing the cursor contract.
///
/// Cheap to clone; clones share the same store. Besides serving pages it can
/// inject failures and latency and records every query it receives.
#[derive(Clone, Default)]
pub struct MemoryHistory {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    store: Mutex<MemoryStore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
struct MemoryStore {
    messages: Vec<Message>,
    failures: VecDeque<FetchError>,
    queries: Vec<HistoryQuery>,
    latency: Option<Duration>,
}

impl MemoryHistory {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        let history = Self::default();
        history.store().messages.extend(messages);
        history
    }

    /// Append a message, as if it had just been posted.
    pub fn push(&self, message: Message) {
        self.store().messages.push(message);
    }

    /// Make the next fetch fail with `error`.
    pub fn fail_next(&self, error: FetchError) {
        self.store().failures.push_back(error);
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.store().latency = Some(latency);
    }

    /// Every query received so far, in arrival order.
    pub fn queries(&self) -> Vec<HistoryQuery> {
        self.store().queries.clone()
    }

    /// Highest number of fetches that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn store(&self) -> MutexGuard<'_, MemoryStore> {
        self.inner.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page_for(&self, query: HistoryQuery) -> Result<HistoryPage, FetchError> {
        let mut store = self.store();
        store.queries.push(query);
        if let Some(error) = store.failures.pop_front() {
            return Err(error);
        }

        let mut candidates: Vec<&Message> = store
            .messages
            .iter()
            .filter(|m| query.cursor.is_none_or(|cursor| m.ordering_key() < cursor))
            .collect();
        candidates.sort_by(|a, b| {
            b.ordering_key()
                .cmp(&a.ordering_key())
                .then_with(|| b.id.cmp(&a.id))
        });

        let take = candidates.len().min(query.page_size as usize);
        let list: Vec<Message> = candidates[..take].iter().rev().map(|m| (*m).clone()).collect();
        let oldest = list.first().map(Message::ordering_key);
        let has_next_page = match oldest {
            Some(oldest) => candidates[take..].iter().any(|m| m.ordering_key() < oldest),
            None => false,
        };

        Ok(HistoryPage {
            list,
            has_next_page,
            next_cursor: if has_next_page { oldest } else { None },
            total: store.messages.len() as u64,
        })
    }
}

impl HistorySource for MemoryHistory {
    async fn fetch(&self, query: HistoryQuery) -> Result<HistoryPage, FetchError> {
        let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = self.store().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let page = self.page_for(query);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        page
    }
}
