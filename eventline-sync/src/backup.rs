//! Full-state snapshots for bootstrapping new devices.
//!
//! A snapshot is a `Backup` record in the backups zone carrying the blob,
//! the change cursor the blob is consistent with, and the application's
//! schema version. Restoring walks snapshots newest first, checks that the
//! store still accepts the snapshot's cursor, and hands the blob to an
//! application migration. The first snapshot that passes both becomes the
//! new sync position.

use crate::cursor::CursorManager;
use crate::downloader::Downloader;
use crate::error::{SyncError, SyncResult};
use crate::guard::FlightGuard;
use crate::remote::{RecordQuery, RecordStore};
use chrono::{DateTime, Utc};
use eventline_types::{ChangeCursor, Record, RecordAdapter, RecordError, RecordId, ZoneId};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Record type of backup snapshots.
pub const BACKUP_RECORD_TYPE: &str = "Backup";

const FILE_FIELD: &str = "file";
const CHANGE_TOKEN_FIELD: &str = "changeToken";
const VERSION_FIELD: &str = "version";
const TIMESTAMP_FIELD: &str = "timestamp";

/// A decoded backup record.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSnapshot {
    pub id: RecordId,
    /// Local path of the blob.
    pub file: PathBuf,
    /// Cursor the blob is consistent with.
    pub cursor: ChangeCursor,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

impl BackupSnapshot {
    /// Decodes a backup record, rejecting records of another type or with
    /// missing or mistyped fields.
    pub fn from_record(record: &Record) -> SyncResult<Self> {
        if record.record_type() != BACKUP_RECORD_TYPE {
            return Err(RecordError::TypeMismatch {
                expected: BACKUP_RECORD_TYPE.to_string(),
                actual: record.record_type().to_string(),
            }
            .into());
        }

        let token = record.bytes(CHANGE_TOKEN_FIELD)?;
        if token.is_empty() {
            return Err(RecordError::InvalidValue {
                field: CHANGE_TOKEN_FIELD.to_string(),
                reason: "empty change token".to_string(),
            }
            .into());
        }

        Ok(Self {
            id: record.id.clone(),
            file: record.asset(FILE_FIELD)?.to_path_buf(),
            cursor: ChangeCursor::new(token),
            version: record.int(VERSION_FIELD)?,
            timestamp: record.timestamp(TIMESTAMP_FIELD)?,
        })
    }
}

/// Uploads, lists, prunes and restores backup snapshots.
pub struct BackupManager {
    store: Arc<dyn RecordStore>,
    downloader: Arc<Downloader>,
    cursor: Arc<CursorManager>,
    zone: ZoneId,
    restoring: Arc<AtomicBool>,
}

impl BackupManager {
    /// Creates a manager storing snapshots in `zone`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        downloader: Arc<Downloader>,
        cursor: Arc<CursorManager>,
        zone: ZoneId,
    ) -> Self {
        Self {
            store,
            downloader,
            cursor,
            zone,
            restoring: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while a restore is in flight.
    pub fn is_restoring(&self) -> bool {
        self.restoring.load(Ordering::SeqCst)
    }

    /// Uploads `blob_path` as a snapshot of the current state.
    ///
    /// The snapshot is tagged with the current cursor, so it fails with
    /// [`SyncError::NoChangeToken`] before the first fetch or restore.
    pub async fn upload_backup(&self, schema_version: i64, blob_path: &Path) -> SyncResult<Record> {
        let cursor = self.cursor.read().await?.ok_or(SyncError::NoChangeToken)?;

        let record = Record::new(
            BACKUP_RECORD_TYPE,
            RecordId::new(Uuid::new_v4().to_string(), self.zone.clone()),
        )
        .with_field(FILE_FIELD, blob_path.to_path_buf())
        .with_field(CHANGE_TOKEN_FIELD, cursor.into_bytes())
        .with_field(VERSION_FIELD, schema_version)
        .with_field(TIMESTAMP_FIELD, Utc::now());

        let saved = self.store.save(record).await?;
        info!("Uploaded backup {} (schema v{})", saved.id, schema_version);
        Ok(saved)
    }

    /// Snapshots for `schema_version`, newest first.
    pub async fn list_backups(&self, schema_version: i64) -> SyncResult<Vec<Record>> {
        let query = RecordQuery::new(self.zone.clone(), BACKUP_RECORD_TYPE)
            .filter_eq(VERSION_FIELD, schema_version)
            .sort_by(TIMESTAMP_FIELD, false);
        self.store.query(&query).await
    }

    /// Deletes all but the `keep_most_recent` newest snapshots for
    /// `schema_version`. Returns how many were deleted.
    pub async fn clean_backups(
        &self,
        keep_most_recent: usize,
        schema_version: i64,
    ) -> SyncResult<usize> {
        let backups = self.list_backups(schema_version).await?;
        let stale: Vec<RecordId> = backups
            .into_iter()
            .skip(keep_most_recent)
            .map(|r| r.id)
            .collect();

        if stale.is_empty() {
            debug!("No backups to clean for schema v{}", schema_version);
            return Ok(0);
        }

        self.store.delete(&stale).await?;
        info!("Deleted {} old backups (schema v{})", stale.len(), schema_version);
        Ok(stale.len())
    }

    /// Restores the newest usable snapshot for `schema_version`, adopts
    /// its cursor and returns it.
    ///
    /// For each snapshot, newest first: malformed records are skipped; the
    /// snapshot's cursor is checked with a one-record fetch, and a snapshot
    /// whose cursor has expired is skipped; then `migrate` is called with
    /// the blob path. The first snapshot whose migration succeeds wins and
    /// its cursor is written before the restoring flag clears. Check errors
    /// other than cursor expiry abort the restore.
    ///
    /// The restore runs on its own task: dropping the returned future does
    /// not stop it.
    pub async fn restore_from_backup<F, Fut>(
        self: &Arc<Self>,
        schema_version: i64,
        migrate: F,
    ) -> SyncResult<ChangeCursor>
    where
        F: FnMut(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let flight =
            FlightGuard::try_acquire(&self.restoring).ok_or(SyncError::AlreadyRestoring)?;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let _flight = flight;
            let cursor = this.find_restorable(schema_version, migrate).await?;
            this.cursor.write(Some(cursor.clone())).await?;
            Ok::<_, SyncError>(cursor)
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }

    async fn find_restorable<F, Fut>(
        &self,
        schema_version: i64,
        mut migrate: F,
    ) -> SyncResult<ChangeCursor>
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let candidates = self.list_backups(schema_version).await?;
        info!(
            "Restoring from backup: {} candidates for schema v{}",
            candidates.len(),
            schema_version
        );

        for record in &candidates {
            let snapshot = match BackupSnapshot::from_record(record) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Skipping malformed backup {}: {}", record.id, e);
                    continue;
                }
            };

            match self.downloader.fetch_since(Some(&snapshot.cursor), 1).await {
                Ok(_) => {}
                Err(SyncError::ChangeTokenExpired) => {
                    warn!("Skipping backup {}: change token expired", snapshot.id);
                    continue;
                }
                Err(e) => return Err(e),
            }

            match migrate(snapshot.file.clone()).await {
                Ok(()) => {
                    info!(
                        "Restored backup {} taken at {}",
                        snapshot.id, snapshot.timestamp
                    );
                    return Ok(snapshot.cursor);
                }
                Err(e) => {
                    warn!("Migration of backup {} failed: {:#}", snapshot.id, e);
                }
            }
        }

        Err(SyncError::NoCandidates)
    }
}
