use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use cipherroom_crypto::RoomKey;
use cipherroom_types::{Message, RoomEvent, Timestamp};

use crate::anchor::{AnchorPhase, ScrollAnchorTracker};
use crate::config::SyncConfig;
use crate::error::SessionError;
use crate::fetcher::{HistoryCursorFetcher, HistorySource};
use crate::pipeline::{DecryptedMessage, DecryptionPipeline};
use crate::queue::SerialTaskQueue;
use crate::timeline::{IngestOutcome, LiveMergeStream};

pub type UpdateCallback = Arc<dyn Fn(&SessionUpdate) + Send + Sync>;
pub type LoadReceiver = oneshot::Receiver<Result<LoadOutcome, SessionError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    InitialPage,
    OlderPage,
    Live,
    Reset,
    Closed,
}

/// Delivered to `on_update` listeners after every change to the timeline or
/// the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    pub epoch: u64,
    pub reason: UpdateReason,
    pub len: usize,
    pub first_item_index: u64,
}

/// Result of one fetch-decrypt-merge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub fetched: usize,
    pub inserted: usize,
    /// No older history is left.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pagination {
    NotLoaded,
    More(Timestamp),
    Exhausted,
}

struct SessionState {
    epoch: u64,
    closed: bool,
    timeline: LiveMergeStream,
    anchor: ScrollAnchorTracker,
    pagination: Pagination,
}

impl SessionState {
    fn check(&self, epoch: u64) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else if self.epoch != epoch {
            Err(SessionError::Stale)
        } else {
            Ok(())
        }
    }

    fn update(&self, reason: UpdateReason) -> SessionUpdate {
        SessionUpdate {
            epoch: self.epoch,
            reason,
            len: self.timeline.len(),
            first_item_index: self.anchor.first_item_index(),
        }
    }
}

struct SessionInner<S> {
    session_id: Uuid,
    room_id: String,
    page_size: u32,
    fetcher: HistoryCursorFetcher<S>,
    pipeline: DecryptionPipeline,
    queue: SerialTaskQueue,
    state: Mutex<SessionState>,
    listeners: Mutex<Vec<UpdateCallback>>,
}

impl<S> SessionInner<S> {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, update: SessionUpdate) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&update);
        }
    }
}

/// One open room view: owns the timeline, the anchor, the pagination cursor
/// and the task queue that serializes history loads.
///
/// Cheap to clone; clones share the session. A reset (for example after the
/// live channel reconnected) starts a new epoch; work started under an older
/// epoch is discarded when it completes.
pub struct RoomSession<S> {
    inner: Arc<SessionInner<S>>,
}

impl<S> Clone for RoomSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: HistorySource + 'static> RoomSession<S> {
    /// Build a session without loading anything. Must be called from within
    /// a tokio runtime.
    pub fn new(config: SyncConfig, room_id: impl Into<String>, source: S, key: Arc<RoomKey>) -> Self {
        let room_id = room_id.into();
        let queue = SerialTaskQueue::new(format!("room:{}", room_id));

        Self {
            inner: Arc::new(SessionInner {
                session_id: Uuid::new_v4(),
                page_size: config.bounded_page_size(config.page_size),
                fetcher: HistoryCursorFetcher::new(source, config),
                pipeline: DecryptionPipeline::new(key),
                queue,
                state: Mutex::new(SessionState {
                    epoch: 0,
                    closed: false,
                    timeline: LiveMergeStream::new(),
                    anchor: ScrollAnchorTracker::new(),
                    pagination: Pagination::NotLoaded,
                }),
                listeners: Mutex::new(Vec::new()),
                room_id,
            }),
        }
    }

    /// Build a session and load the newest page of history.
    pub async fn open(
        config: SyncConfig,
        room_id: impl Into<String>,
        source: S,
        key: Arc<RoomKey>,
    ) -> Result<Self, SessionError> {
        let session = Self::new(config, room_id, source, key);
        let outcome = wait_for(session.load_older()).await?;
        info!(
            room = %session.inner.room_id,
            session = %session.inner.session_id,
            fetched = outcome.fetched,
            first_item_index = session.first_item_index(),
            "room session opened"
        );
        Ok(session)
    }

    /// Queue a load of the next older page (the newest page if nothing has
    /// been loaded yet). The cursor is read when the task runs, so queued
    /// loads continue from wherever the previous one stopped.
    pub fn load_older(&self) -> LoadReceiver {
        let epoch = self.inner.state().epoch;
        self.enqueue_load(epoch)
    }

    pub async fn load_older_and_wait(&self) -> Result<LoadOutcome, SessionError> {
        wait_for(self.load_older()).await
    }

    /// Decrypt and merge one message pushed by the live channel.
    pub fn ingest_live(&self, message: Message) -> IngestOutcome {
        let decrypted = self.inner.pipeline.decrypt_one(&message);

        let (outcome, update) = {
            let mut state = self.inner.state();
            if state.closed {
                debug!(room = %self.inner.room_id, message_id = %message.id, "dropping live message for closed session");
                return IngestOutcome::default();
            }
            let outcome = state.timeline.ingest_live(decrypted);
            if !outcome.changed() {
                debug!(room = %self.inner.room_id, message_id = %message.id, "live message already in timeline");
                return outcome;
            }
            (outcome, state.update(UpdateReason::Live))
        };

        self.inner.notify(update);
        outcome
    }

    /// Apply one event from the live channel.
    pub fn handle_event(&self, event: RoomEvent) {
        match event {
            RoomEvent::MessageCreate(message) => {
                self.ingest_live(message);
            }
            RoomEvent::Reconnected => {
                // The reload result reaches listeners through on_update.
                let _ = self.reset();
            }
            RoomEvent::RoomDeleted => self.close(),
        }
    }

    /// Consume live events from `rx` until the channel or the session closes.
    pub fn attach_live(&self, mut rx: mpsc::Receiver<RoomEvent>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                session.handle_event(event);
                if session.is_closed() {
                    break;
                }
            }
            debug!(room = %session.inner.room_id, "live feed detached");
        })
    }

    /// Drop the timeline and anchor and reload from the newest page. A closed
    /// session is left as it is and the receiver resolves to
    /// `SessionError::Closed`.
    pub fn reset(&self) -> LoadReceiver {
        let update = {
            let mut state = self.inner.state();
            if state.closed {
                debug!(room = %self.inner.room_id, "ignoring reset of closed session");
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(SessionError::Closed));
                return rx;
            }
            state.epoch += 1;
            state.timeline.clear();
            state.anchor.reset();
            state.pagination = Pagination::NotLoaded;
            state.update(UpdateReason::Reset)
        };

        info!(room = %self.inner.room_id, epoch = update.epoch, "room session reset, reloading history");
        self.inner.notify(update);
        self.enqueue_load(update.epoch)
    }

    /// Stop accepting work. Pending loads finish with `SessionError::Closed`.
    pub fn close(&self) {
        let update = {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.update(UpdateReason::Closed)
        };

        info!(room = %self.inner.room_id, "room session closed");
        self.inner.notify(update);
    }

    fn enqueue_load(&self, epoch: u64) -> LoadReceiver {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();

        self.inner.queue.enqueue(move || async move {
            let result = run_page_load(&inner, epoch).await;
            let failure = result.as_ref().err().cloned();
            let _ = tx.send(result);
            match failure {
                None | Some(SessionError::Stale) => Ok(()),
                Some(e) => Err(e.into()),
            }
        });

        rx
    }
}

impl<S> RoomSession<S> {
    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Ascending copy of the merged timeline.
    pub fn snapshot(&self) -> Vec<DecryptedMessage> {
        self.inner.state().timeline.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.state().timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_item_index(&self) -> u64 {
        self.inner.state().anchor.first_item_index()
    }

    pub fn anchor_phase(&self) -> AnchorPhase {
        self.inner.state().anchor.phase()
    }

    /// Conversation length reported by the most recent fetch.
    pub fn total(&self) -> u64 {
        self.inner.state().anchor.total()
    }

    /// Whether older history may still be loaded.
    pub fn has_older(&self) -> bool {
        self.inner.state().pagination != Pagination::Exhausted
    }

    pub fn epoch(&self) -> u64 {
        self.inner.state().epoch
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&SessionUpdate) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Loads queued or running.
    pub fn pending_loads(&self) -> usize {
        self.inner.queue.pending()
    }

    /// Wait for every load queued so far.
    pub async fn flush(&self) {
        self.inner.queue.flush().await;
    }
}

async fn wait_for(rx: LoadReceiver) -> Result<LoadOutcome, SessionError> {
    rx.await.map_err(|_| SessionError::QueueClosed)?
}

/// One fetch-decrypt-merge cycle. State is only touched when the session is
/// still on `epoch`.
async fn run_page_load<S: HistorySource>(
    inner: &SessionInner<S>,
    epoch: u64,
) -> Result<LoadOutcome, SessionError> {
    let cursor = {
        let state = inner.state();
        state.check(epoch)?;
        match state.pagination {
            Pagination::NotLoaded => None,
            Pagination::More(cursor) => Some(cursor),
            Pagination::Exhausted => {
                debug!(room = %inner.room_id, "history exhausted, nothing to load");
                return Ok(LoadOutcome {
                    fetched: 0,
                    inserted: 0,
                    exhausted: true,
                });
            }
        }
    };
    let initial = cursor.is_none();

    let page = inner.fetcher.fetch_page(cursor, inner.page_size).await?;
    let total = page.total;
    let next_cursor = page.next_cursor;
    let fetched = page.list.len();
    let decrypted = inner.pipeline.decrypt_page(page.list).await;

    let (outcome, update) = {
        let mut state = inner.state();
        if let Err(e) = state.check(epoch) {
            info!(room = %inner.room_id, epoch, "discarding history page from a previous session state");
            return Err(e);
        }

        let previous_index = state.anchor.first_item_index();
        let merged = state.timeline.ingest_history(decrypted);
        if initial {
            state.anchor.on_initial_page(total, fetched);
        } else {
            state.anchor.on_older_page(total, merged.inserted);
        }
        state.pagination = match next_cursor {
            Some(cursor) => Pagination::More(cursor),
            None => Pagination::Exhausted,
        };

        let changed = initial || merged.changed() || state.anchor.first_item_index() != previous_index;
        let reason = if initial {
            UpdateReason::InitialPage
        } else {
            UpdateReason::OlderPage
        };
        let outcome = LoadOutcome {
            fetched,
            inserted: merged.inserted,
            exhausted: next_cursor.is_none(),
        };
        (outcome, changed.then(|| state.update(reason)))
    };

    debug!(
        room = %inner.room_id,
        epoch,
        fetched = outcome.fetched,
        inserted = outcome.inserted,
        exhausted = outcome.exhausted,
        "history page merged"
    );
    if let Some(update) = update {
        inner.notify(update);
    }
    Ok(outcome)
}
