//! Shared test helpers for sync tests.

#![allow(dead_code)]

use eventline_storage::{MemorySettingsStore, SettingsStore, StorageResult};
use eventline_sync::{MemoryRecordStore, RecordStore, SyncConfig, SyncCoordinator};
use eventline_types::{ClientId, EventId, RecordAdapter, RecordResult, SyncEvent, ZoneId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Installs a test log subscriber once. `RUST_LOG=eventline_sync=debug`
/// shows engine logs for failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompleted {
    pub id: EventId,
    pub task: String,
    pub minutes: i64,
}

impl TaskCompleted {
    pub fn new(task: &str, minutes: i64) -> Self {
        Self {
            id: EventId::new(),
            task: task.to_string(),
            minutes,
        }
    }
}

impl SyncEvent for TaskCompleted {
    const TYPE_ID: &'static str = "TaskCompleted";

    fn event_id(&self) -> EventId {
        self.id
    }

    fn write_fields(&self, record: &mut dyn RecordAdapter) -> RecordResult<()> {
        record.set_field("task", self.task.clone().into());
        record.set_field("minutes", self.minutes.into());
        Ok(())
    }

    fn read_fields(record: &dyn RecordAdapter) -> RecordResult<Self> {
        Ok(Self {
            id: EventId::parse(record.record_name())?,
            task: record.string("task")?.to_string(),
            minutes: record.int("minutes")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteAdded {
    pub id: EventId,
    pub text: String,
}

impl NoteAdded {
    pub fn new(text: &str) -> Self {
        Self {
            id: EventId::new(),
            text: text.to_string(),
        }
    }
}

impl SyncEvent for NoteAdded {
    const TYPE_ID: &'static str = "NoteAdded";

    fn event_id(&self) -> EventId {
        self.id
    }

    fn write_fields(&self, record: &mut dyn RecordAdapter) -> RecordResult<()> {
        record.set_field("text", self.text.clone().into());
        Ok(())
    }

    fn read_fields(record: &dyn RecordAdapter) -> RecordResult<Self> {
        Ok(Self {
            id: EventId::parse(record.record_name())?,
            text: record.string("text")?.to_string(),
        })
    }
}

/// A different Rust type claiming `TaskCompleted`'s type id.
#[derive(Debug, Clone)]
pub struct Impostor;

impl SyncEvent for Impostor {
    const TYPE_ID: &'static str = "TaskCompleted";

    fn event_id(&self) -> EventId {
        EventId::new()
    }

    fn write_fields(&self, _record: &mut dyn RecordAdapter) -> RecordResult<()> {
        Ok(())
    }

    fn read_fields(_record: &dyn RecordAdapter) -> RecordResult<Self> {
        Ok(Self)
    }
}

pub fn events_zone() -> ZoneId {
    ZoneId::new("Events")
}

pub fn backups_zone() -> ZoneId {
    ZoneId::new("Backups")
}

/// A store with both zones created.
pub fn memory_store() -> MemoryRecordStore {
    MemoryRecordStore::with_zones(&[events_zone(), backups_zone()])
}

pub fn config(client_id: ClientId, queue_dir: &Path) -> SyncConfig {
    SyncConfig {
        client_id: Some(client_id),
        queue_dir: queue_dir.to_path_buf(),
        fetch_timeout_ms: 2_000,
        ..Default::default()
    }
}

/// A coordinator for a fresh client on `store`, with in-memory settings.
pub async fn coordinator(
    store: &MemoryRecordStore,
    queue_dir: &Path,
) -> (SyncCoordinator, Arc<MemorySettingsStore>) {
    init_tracing();
    let settings = Arc::new(MemorySettingsStore::new());
    let store: Arc<dyn RecordStore> = Arc::new(store.clone());
    let settings_dyn: Arc<dyn SettingsStore> = settings.clone();
    let coordinator = SyncCoordinator::new(config(ClientId::new(), queue_dir), store, settings_dyn)
        .await
        .unwrap();
    (coordinator, settings)
}

/// Settings store whose writes block for `delay` before landing.
pub struct SlowSettings {
    pub inner: MemorySettingsStore,
    pub delay: Duration,
}

impl SlowSettings {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemorySettingsStore::new(),
            delay,
        }
    }
}

impl SettingsStore for SlowSettings {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        std::thread::sleep(self.delay);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        std::thread::sleep(self.delay);
        self.inner.remove(key)
    }
}
