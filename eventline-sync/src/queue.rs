//! Upload path with durable offline queuing.
//!
//! An event that cannot be saved is written to the queue directory as
//! `<event-id>.json` and stays there until a later drain delivers it.
//! Event ids are UUID v7, so sorting entries by file name replays them in
//! the order they were enqueued.

use crate::error::{SyncError, SyncResult};
use crate::remote::RecordStore;
use chrono::{DateTime, Utc};
use eventline_types::{
    ClientId, EventId, FieldValue, Record, RecordAdapter, RecordId, SyncEvent, ZoneId,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Record field carrying the uploading client's id.
pub const CLIENT_ID_FIELD: &str = "clientID";

const ENTRY_EXTENSION: &str = "json";

/// An event waiting in the queue directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRecord {
    pub event_id: EventId,
    pub type_id: String,
    pub queued_at: DateTime<Utc>,
    pub record: Record,
}

/// Result of uploading one event.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The store accepted the record; this is the committed copy.
    Delivered(Record),
    /// The save failed for a transient reason and the record was queued for
    /// a later drain.
    Queued { record: Record, reason: SyncError },
}

impl UploadOutcome {
    /// The delivered or queued record.
    pub fn record(&self) -> &Record {
        match self {
            Self::Delivered(record) | Self::Queued { record, .. } => record,
        }
    }

    /// Returns true if the store accepted the record.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Result of one drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Committed records, in delivery order.
    pub uploaded: Vec<Record>,
    /// True if a newer drain cancelled this one.
    pub cancelled: bool,
}

/// Uploads events and replays the ones that could not be delivered.
pub struct UploadQueue {
    store: Arc<dyn RecordStore>,
    queue_dir: PathBuf,
    zone: ZoneId,
    client_id: ClientId,
    /// Serializes drains.
    drain_lock: Mutex<()>,
    /// Cancellation flag of the most recently started drain.
    latest_drain: std::sync::Mutex<Arc<AtomicBool>>,
}

impl UploadQueue {
    /// Creates a queue uploading into `zone` and spooling into `queue_dir`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue_dir: impl Into<PathBuf>,
        zone: ZoneId,
        client_id: ClientId,
    ) -> Self {
        Self {
            store,
            queue_dir: queue_dir.into(),
            zone,
            client_id,
            drain_lock: Mutex::new(()),
            latest_drain: std::sync::Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Returns the queue directory.
    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    /// Encodes an event as a record in the events zone, stamped with our
    /// client id.
    pub fn build_record<E: SyncEvent>(&self, event: &E) -> SyncResult<Record> {
        let id = RecordId::new(event.event_id().to_string(), self.zone.clone());
        let mut record = Record::new(E::TYPE_ID, id);
        event.write_fields(&mut record)?;
        record.set_field(CLIENT_ID_FIELD, FieldValue::String(self.client_id.to_string()));
        Ok(record)
    }

    /// Uploads one event.
    ///
    /// A save that failed for a transient reason (see
    /// [`SyncError::is_retryable`]) is not an error: the record is queued and
    /// returned as [`UploadOutcome::Queued`]. A save the store rejected is
    /// returned as an error and not queued, since replaying it would fail
    /// the same way and block every later entry. A failure to queue is
    /// also an error. In both error cases the event was neither delivered
    /// nor queued.
    pub async fn upload_event<E: SyncEvent>(&self, event: &E) -> SyncResult<UploadOutcome> {
        let record = self.build_record(event)?;

        match self.store.save(record.clone()).await {
            Ok(committed) => {
                debug!("Uploaded event {} ({})", event.event_id(), E::TYPE_ID);
                Ok(UploadOutcome::Delivered(committed))
            }
            Err(reason) if !reason.is_retryable() => {
                warn!(
                    "Store rejected event {} ({}), not queueing: {}",
                    event.event_id(),
                    E::TYPE_ID,
                    reason
                );
                Err(reason)
            }
            Err(reason) => {
                warn!(
                    "Upload of event {} failed, queueing: {}",
                    event.event_id(),
                    reason
                );
                self.enqueue(&QueuedRecord {
                    event_id: event.event_id(),
                    type_id: E::TYPE_ID.to_string(),
                    queued_at: Utc::now(),
                    record: record.clone(),
                })
                .await?;
                Ok(UploadOutcome::Queued { record, reason })
            }
        }
    }

    async fn enqueue(&self, entry: &QueuedRecord) -> SyncResult<()> {
        fs::create_dir_all(&self.queue_dir).await?;

        let path = self.entry_path(&entry.event_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(entry)?;

        // Write then rename so a drain never sees a half-written entry.
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        info!("Queued event {}", entry.event_id);
        Ok(())
    }

    fn entry_path(&self, event_id: &EventId) -> PathBuf {
        self.queue_dir.join(format!("{event_id}.{ENTRY_EXTENSION}"))
    }

    /// Paths of queued entries, in delivery order.
    pub async fn pending(&self) -> SyncResult<Vec<PathBuf>> {
        let mut dir = match fs::read_dir(&self.queue_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Number of queued entries.
    pub async fn len(&self) -> SyncResult<usize> {
        Ok(self.pending().await?.len())
    }

    /// Returns true if nothing is queued.
    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Reads one queued entry.
    pub async fn load(path: &Path) -> SyncResult<QueuedRecord> {
        let entry = entry_name(path);
        let data = fs::read(path).await.map_err(|e| SyncError::QueueDrain {
            entry: entry.clone(),
            source: Box::new(e.into()),
        })?;
        serde_json::from_slice(&data).map_err(|e| SyncError::QueueDecode {
            entry,
            reason: e.to_string(),
        })
    }

    /// Replays queued entries, oldest first.
    ///
    /// Starting a drain cancels the one in progress, which stops before its
    /// next entry; this drain then runs once the previous one has exited.
    /// Each entry is removed only after its save succeeded. Any failure
    /// stops the drain and leaves the failing entry queued.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut latest = self.latest_drain.lock().unwrap_or_else(|e| e.into_inner());
            latest.store(true, Ordering::SeqCst);
            *latest = Arc::clone(&cancel);
        }

        let _drain = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        for path in self.pending().await? {
            if cancel.load(Ordering::SeqCst) {
                info!("Queue drain cancelled after {} entries", report.uploaded.len());
                report.cancelled = true;
                return Ok(report);
            }

            let entry = entry_name(&path);
            let queued = Self::load(&path).await?;

            let committed = self
                .store
                .save(queued.record)
                .await
                .map_err(|e| SyncError::QueueDrain {
                    entry: entry.clone(),
                    source: Box::new(e),
                })?;

            fs::remove_file(&path)
                .await
                .map_err(|e| SyncError::QueueDrain {
                    entry: entry.clone(),
                    source: Box::new(e.into()),
                })?;

            debug!("Delivered queued entry {}", entry);
            report.uploaded.push(committed);
        }

        if !report.uploaded.is_empty() {
            info!("Drained {} queued events", report.uploaded.len());
        }
        Ok(report)
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
