use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use cipherroom_crypto::{RoomKey, seal};
use cipherroom_sync::{
    AnchorPhase, FetchError, MemoryHistory, RoomSession, SessionError, SessionUpdate, SyncConfig,
    UNAVAILABLE_PLACEHOLDER, UpdateReason,
};
use cipherroom_types::{Message, RoomEvent};

const ROOM: &str = "room-1";

fn config() -> SyncConfig {
    SyncConfig {
        page_size: 50,
        ..SyncConfig::default()
    }
}

fn message(key: &RoomKey, n: i64) -> Message {
    Message {
        id: format!("m{:03}", n),
        ciphertext: seal(key, &format!("hello {}", n)).unwrap(),
        sender_id: "u1".into(),
        sender_name: Some("alice".into()),
        created_at: Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
        updated_at: None,
    }
}

fn room(count: i64) -> (Arc<RoomKey>, MemoryHistory) {
    let key = Arc::new(RoomKey::generate());
    let history = MemoryHistory::new((0..count).map(|n| message(&key, n)));
    (key, history)
}

#[tokio::test]
async fn anchor_tracks_prepended_pages() {
    let (key, history) = room(120);
    let session = RoomSession::open(config(), ROOM, history.clone(), key).await.unwrap();

    assert_eq!(session.len(), 50);
    assert_eq!(session.first_item_index(), 70);
    assert_eq!(session.anchor_phase(), AnchorPhase::Initialized);

    let outcome = session.load_older_and_wait().await.unwrap();
    assert_eq!(outcome.inserted, 50);
    assert!(!outcome.exhausted);
    assert_eq!(session.len(), 100);
    assert_eq!(session.first_item_index(), 20);

    let outcome = session.load_older_and_wait().await.unwrap();
    assert_eq!(outcome.inserted, 20);
    assert!(outcome.exhausted);
    assert_eq!(session.len(), 120);
    assert_eq!(session.first_item_index(), 0);
    assert!(!session.has_older());

    // Exhausted sessions answer without another request.
    let outcome = session.load_older_and_wait().await.unwrap();
    assert_eq!(outcome.fetched, 0);
    assert!(outcome.exhausted);
    assert_eq!(history.queries().len(), 3);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.first().unwrap().id(), "m000");
    assert_eq!(snapshot.last().unwrap().id(), "m119");
    assert_eq!(snapshot[7].display_text(), "hello 7");
}

#[tokio::test]
async fn queued_loads_run_one_at_a_time_in_order() {
    let (key, history) = room(160);
    let session = RoomSession::open(config(), ROOM, history.clone(), key).await.unwrap();
    let first_page_oldest = session.snapshot()[0].ordering_key();

    history.set_latency(Duration::from_millis(20));
    let first = session.load_older();
    let second = session.load_older();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.inserted, 50);
    assert_eq!(second.inserted, 50);
    assert_eq!(session.len(), 150);
    assert_eq!(session.first_item_index(), 10);

    let queries = history.queries();
    assert_eq!(queries.len(), 3);
    assert_eq!(queries[0].cursor, None);
    assert_eq!(queries[1].cursor, Some(first_page_oldest));
    assert!(queries[2].cursor.unwrap() < queries[1].cursor.unwrap());
    assert_eq!(history.max_in_flight(), 1);
}

#[tokio::test]
async fn live_message_seen_before_history_is_not_duplicated() {
    let (key, history) = room(80);
    let session = RoomSession::new(config(), ROOM, history.clone(), key.clone());

    let live = session.ingest_live(message(&key, 79));
    assert_eq!(live.inserted, 1);

    session.load_older_and_wait().await.unwrap();
    assert_eq!(session.len(), 50);
    assert_eq!(session.first_item_index(), 30);

    let newer = message(&key, 80);
    history.push(newer.clone());
    assert!(session.ingest_live(newer.clone()).changed());
    assert!(!session.ingest_live(newer).changed());

    assert_eq!(session.len(), 51);
    assert_eq!(session.first_item_index(), 30);
    assert_eq!(session.snapshot().last().unwrap().id(), "m080");
}

#[tokio::test]
async fn undecryptable_message_keeps_its_slot() {
    let key = Arc::new(RoomKey::generate());
    let mut messages: Vec<Message> = (0..5).map(|n| message(&key, n)).collect();
    messages[2].ciphertext = "garbled".into();
    let history = MemoryHistory::new(messages);

    let session = RoomSession::open(config(), ROOM, history, key).await.unwrap();
    let snapshot = session.snapshot();

    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot[2].id(), "m002");
    assert!(snapshot[2].failed());
    assert_eq!(snapshot[2].display_text(), UNAVAILABLE_PLACEHOLDER);
    assert_eq!(snapshot[3].display_text(), "hello 3");
}

#[tokio::test]
async fn wrong_key_renders_placeholders_without_failing_the_load() {
    let (_, history) = room(3);
    let other_key = Arc::new(RoomKey::generate());

    let session = RoomSession::open(config(), ROOM, history, other_key).await.unwrap();
    assert_eq!(session.len(), 3);
    assert!(session.snapshot().iter().all(|m| m.failed()));
}

#[tokio::test]
async fn failed_fetch_leaves_state_untouched_and_can_be_retried() {
    let (key, history) = room(120);
    let session = RoomSession::open(config(), ROOM, history.clone(), key).await.unwrap();

    history.fail_next(FetchError::Transport("connection reset".into()));
    let err = session.load_older_and_wait().await.unwrap_err();
    assert!(matches!(err, SessionError::Fetch(FetchError::Transport(_))));
    assert_eq!(session.len(), 50);
    assert_eq!(session.first_item_index(), 70);
    assert!(session.has_older());

    session.load_older_and_wait().await.unwrap();
    assert_eq!(session.len(), 100);
    assert_eq!(session.first_item_index(), 20);

    let queries = history.queries();
    assert_eq!(queries[1].cursor, queries[2].cursor);
}

#[tokio::test]
async fn open_propagates_auth_failure() {
    let (key, history) = room(10);
    history.fail_next(FetchError::Auth("401: token expired".into()));

    let Err(err) = RoomSession::open(config(), ROOM, history, key).await else {
        panic!("open should fail");
    };
    assert!(matches!(err, SessionError::Fetch(ref e) if e.is_auth()));
}

#[tokio::test]
async fn reset_discards_page_from_previous_epoch() {
    let (key, history) = room(120);
    let session = RoomSession::open(config(), ROOM, history.clone(), key).await.unwrap();

    history.set_latency(Duration::from_millis(50));
    let older = session.load_older();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let reload = session.reset();

    assert_eq!(older.await.unwrap(), Err(SessionError::Stale));
    let outcome = reload.await.unwrap().unwrap();
    assert_eq!(outcome.fetched, 50);

    assert_eq!(session.epoch(), 1);
    assert_eq!(session.len(), 50);
    assert_eq!(session.first_item_index(), 70);
}

#[tokio::test]
async fn listeners_see_every_change() {
    let (key, history) = room(60);
    let session = RoomSession::new(config(), ROOM, history, key.clone());

    let seen: Arc<Mutex<Vec<SessionUpdate>>> = Arc::default();
    let sink = seen.clone();
    session.on_update(move |update| sink.lock().unwrap().push(*update));

    session.load_older_and_wait().await.unwrap();
    session.ingest_live(message(&key, 60));
    session.reset().await.unwrap().unwrap();

    let reasons: Vec<UpdateReason> = seen.lock().unwrap().iter().map(|u| u.reason).collect();
    assert_eq!(
        reasons,
        vec![
            UpdateReason::InitialPage,
            UpdateReason::Live,
            UpdateReason::Reset,
            UpdateReason::InitialPage,
        ]
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].len, 50);
    assert_eq!(seen[0].first_item_index, 10);
    assert_eq!(seen[1].len, 51);
    assert_eq!(seen[2].len, 0);
    assert_eq!(seen[3].epoch, 1);
}

#[tokio::test]
async fn reconnect_event_reloads_history() {
    let (key, history) = room(70);
    let session = RoomSession::open(config(), ROOM, history.clone(), key.clone()).await.unwrap();
    session.load_older_and_wait().await.unwrap();
    assert_eq!(session.len(), 70);

    session.handle_event(RoomEvent::Reconnected);
    session.flush().await;

    assert_eq!(session.epoch(), 1);
    assert_eq!(session.len(), 50);
    assert_eq!(session.first_item_index(), 20);
    assert!(session.has_older());
}

#[tokio::test]
async fn room_deletion_closes_the_session() {
    let (key, history) = room(10);
    let session = RoomSession::open(config(), ROOM, history, key.clone()).await.unwrap();

    session.handle_event(RoomEvent::RoomDeleted);
    assert!(session.is_closed());

    assert_eq!(session.load_older_and_wait().await, Err(SessionError::Closed));
    assert!(!session.ingest_live(message(&key, 11)).changed());
    assert_eq!(session.len(), 10);
}

#[tokio::test]
async fn closed_session_keeps_its_timeline_on_reconnect() {
    let (key, history) = room(10);
    let session = RoomSession::open(config(), ROOM, history.clone(), key).await.unwrap();
    session.close();

    session.handle_event(RoomEvent::Reconnected);
    assert_eq!(session.reset().await.unwrap(), Err(SessionError::Closed));
    session.flush().await;

    assert_eq!(session.epoch(), 0);
    assert_eq!(session.len(), 10);
    assert_eq!(session.first_item_index(), 0);
    assert_eq!(history.queries().len(), 1);
}

#[tokio::test]
async fn attached_live_feed_is_merged() {
    let (key, history) = room(10);
    let session = RoomSession::open(config(), ROOM, history, key.clone()).await.unwrap();

    let (tx, rx) = mpsc::channel(8);
    let feed = session.attach_live(rx);

    tx.send(RoomEvent::MessageCreate(message(&key, 10))).await.unwrap();
    tx.send(RoomEvent::MessageCreate(message(&key, 11))).await.unwrap();
    drop(tx);
    feed.await.unwrap();

    assert_eq!(session.len(), 12);
    assert_eq!(session.snapshot().last().unwrap().display_text(), "hello 11");
}
