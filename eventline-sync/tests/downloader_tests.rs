mod common;

use common::{SlowSettings, TaskCompleted, events_zone, memory_store};
use eventline_storage::{CURSOR_KEY, MemorySettingsStore, SettingsStore};
use eventline_sync::{
    CursorManager, Downloader, MemoryRecordStore, RecordStore, SyncError, UploadQueue,
};
use eventline_types::{ChangeCursor, ClientId, FieldValue};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Client {
    queue: UploadQueue,
    downloader: Arc<Downloader>,
    cursor: Arc<CursorManager>,
}

async fn client(store: &MemoryRecordStore, dir: &TempDir, timeout: Duration) -> Client {
    let id = ClientId::new();
    let remote: Arc<dyn RecordStore> = Arc::new(store.clone());
    let cursor = Arc::new(
        CursorManager::load(Arc::new(MemorySettingsStore::new()))
            .await
            .unwrap(),
    );
    Client {
        queue: UploadQueue::new(
            remote.clone(),
            dir.path().join(id.to_string()),
            events_zone(),
            id,
        ),
        downloader: Arc::new(Downloader::new(
            remote,
            cursor.clone(),
            events_zone(),
            id,
            timeout,
        )),
        cursor,
    }
}

// ── Self-filtering ──────────────────────────────────────────────

#[tokio::test]
async fn own_events_are_never_returned() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let alice = client(&store, &temp, Duration::from_secs(2)).await;
    let bob = client(&store, &temp, Duration::from_secs(2)).await;

    alice.queue.upload_event(&TaskCompleted::new("alice", 1)).await.unwrap();
    bob.queue.upload_event(&TaskCompleted::new("bob", 2)).await.unwrap();

    let seen_by_alice = alice.downloader.fetch_and_advance(None).await.unwrap();
    assert_eq!(seen_by_alice.len(), 1);
    assert_eq!(
        seen_by_alice[0].fields.get("task"),
        Some(&FieldValue::from("bob"))
    );

    let seen_by_bob = bob.downloader.fetch_and_advance(None).await.unwrap();
    assert_eq!(seen_by_bob.len(), 1);
    assert_eq!(
        seen_by_bob[0].fields.get("task"),
        Some(&FieldValue::from("alice"))
    );
}

// ── Cursor handling ─────────────────────────────────────────────

#[tokio::test]
async fn fetch_and_advance_moves_the_cursor() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    let reader = client(&store, &temp, Duration::from_secs(2)).await;

    writer.queue.upload_event(&TaskCompleted::new("one", 1)).await.unwrap();
    assert_eq!(reader.downloader.fetch_and_advance(None).await.unwrap().len(), 1);
    let after_first = reader.cursor.read().await.unwrap();
    assert!(after_first.is_some());

    // Nothing new: nothing returned.
    assert!(reader.downloader.fetch_and_advance(None).await.unwrap().is_empty());

    writer.queue.upload_event(&TaskCompleted::new("two", 2)).await.unwrap();
    let second = reader.downloader.fetch_and_advance(None).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_ne!(reader.cursor.read().await.unwrap(), after_first);
}

#[tokio::test]
async fn failed_fetch_leaves_cursor_untouched() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    let reader = client(&store, &temp, Duration::from_secs(2)).await;

    writer.queue.upload_event(&TaskCompleted::new("one", 1)).await.unwrap();
    reader.downloader.fetch_and_advance(None).await.unwrap();
    let before = reader.cursor.read().await.unwrap();

    writer.queue.upload_event(&TaskCompleted::new("two", 2)).await.unwrap();
    store.set_offline(true);
    let err = reader.downloader.fetch_and_advance(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(reader.cursor.read().await.unwrap(), before);
    assert!(!reader.downloader.is_fetching());

    // The missed event arrives on the next successful fetch.
    store.set_offline(false);
    assert_eq!(reader.downloader.fetch_and_advance(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn expired_cursor_is_propagated() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    let reader = client(&store, &temp, Duration::from_secs(2)).await;

    writer.queue.upload_event(&TaskCompleted::new("one", 1)).await.unwrap();
    reader.downloader.fetch_and_advance(None).await.unwrap();
    let before = reader.cursor.read().await.unwrap();

    writer.queue.upload_event(&TaskCompleted::new("two", 2)).await.unwrap();
    store.expire_cursors(&events_zone());

    let err = reader.downloader.fetch_and_advance(None).await.unwrap_err();
    assert!(matches!(err, SyncError::ChangeTokenExpired));
    assert_eq!(reader.cursor.read().await.unwrap(), before);
}

#[tokio::test]
async fn cursor_override_replaces_stored_cursor() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    let reader = client(&store, &temp, Duration::from_secs(2)).await;

    for i in 0..3 {
        writer.queue.upload_event(&TaskCompleted::new("t", i)).await.unwrap();
    }
    reader.downloader.fetch_and_advance(None).await.unwrap();

    let replayed = reader
        .downloader
        .fetch_and_advance(Some(ChangeCursor::from("1")))
        .await
        .unwrap();
    assert_eq!(replayed.len(), 2);
}

#[tokio::test]
async fn fetch_since_does_not_touch_the_cursor() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    let reader = client(&store, &temp, Duration::from_secs(2)).await;

    writer.queue.upload_event(&TaskCompleted::new("one", 1)).await.unwrap();
    writer.queue.upload_event(&TaskCompleted::new("two", 2)).await.unwrap();

    let page = reader.downloader.fetch_since(None, 1).await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert!(page.more_coming);
    assert!(reader.cursor.read().await.unwrap().is_none());
}

// ── Single flight and timeout ───────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_fetch_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    let reader = client(&store, &temp, Duration::from_secs(2)).await;
    writer.queue.upload_event(&TaskCompleted::new("one", 1)).await.unwrap();

    store.set_latency(Some(Duration::from_millis(200)));
    let first = {
        let downloader = reader.downloader.clone();
        tokio::spawn(async move { downloader.fetch_and_advance(None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(reader.downloader.is_fetching());

    let err = reader.downloader.fetch_and_advance(None).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyFetching));
    assert!(err.is_conflict());

    assert_eq!(first.await.unwrap().unwrap().len(), 1);
    assert!(!reader.downloader.is_fetching());
}

#[tokio::test(start_paused = true)]
async fn slow_store_times_out() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let reader = client(&store, &temp, Duration::from_secs(1)).await;
    store.set_latency(Some(Duration::from_secs(5)));

    let err = reader.downloader.fetch_and_advance(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert!(reader.cursor.read().await.unwrap().is_none());
    assert!(!reader.downloader.is_fetching());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_fetch_finishes_with_cursor_in_sync() {
    let temp = TempDir::new().unwrap();
    let store = memory_store();
    let writer = client(&store, &temp, Duration::from_secs(2)).await;
    writer.queue.upload_event(&TaskCompleted::new("one", 1)).await.unwrap();

    let settings = Arc::new(SlowSettings::new(Duration::from_millis(300)));
    let cursor = Arc::new(CursorManager::load(settings.clone()).await.unwrap());
    let downloader = Arc::new(Downloader::new(
        Arc::new(store.clone()),
        cursor.clone(),
        events_zone(),
        ClientId::new(),
        Duration::from_secs(2),
    ));

    // Give up while the cursor write is still in progress.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), downloader.fetch_and_advance(None)).await;
    assert!(abandoned.is_err());
    assert!(downloader.is_fetching());

    while downloader.is_fetching() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(cursor.read().await.unwrap(), Some(ChangeCursor::from("1")));
    assert_eq!(settings.get(CURSOR_KEY).unwrap(), Some(b"1".to_vec()));
}
