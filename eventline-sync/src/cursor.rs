//! The single "last synced position".
//!
//! Every read and write holds the cursor lock across the settings round
//! trip, so a write can never interleave with another read or write, and a
//! started write always finishes.

use crate::error::{SyncError, SyncResult};
use eventline_storage::{CURSOR_KEY, SettingsStore, StorageResult};
use eventline_types::ChangeCursor;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Runs a blocking settings call on the blocking pool.
pub(crate) async fn with_settings<T, F>(settings: &Arc<dyn SettingsStore>, f: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn SettingsStore) -> StorageResult<T> + Send + 'static,
{
    let settings = Arc::clone(settings);
    let result = tokio::task::spawn_blocking(move || f(settings.as_ref()))
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?;
    Ok(result?)
}

/// Owns the persisted change cursor.
pub struct CursorManager {
    settings: Arc<dyn SettingsStore>,
    current: Arc<Mutex<Option<ChangeCursor>>>,
}

impl CursorManager {
    /// Creates a manager, loading the persisted cursor.
    pub async fn load(settings: Arc<dyn SettingsStore>) -> SyncResult<Self> {
        let stored = with_settings(&settings, |s| s.get(CURSOR_KEY)).await?;
        debug!("Loaded change cursor (present: {})", stored.is_some());
        Ok(Self {
            settings,
            current: Arc::new(Mutex::new(stored.map(ChangeCursor::new))),
        })
    }

    /// Returns the current cursor.
    pub async fn read(&self) -> SyncResult<Option<ChangeCursor>> {
        let current = self.current.lock().await;
        Ok(current.clone())
    }

    /// Replaces the cursor. `None` clears it.
    ///
    /// The in-memory value only changes once persistence succeeded. Once
    /// the lock is taken the write runs on its own task, so dropping the
    /// returned future cannot leave memory and storage disagreeing.
    pub async fn write(&self, cursor: Option<ChangeCursor>) -> SyncResult<()> {
        let mut current = Arc::clone(&self.current).lock_owned().await;
        let settings = Arc::clone(&self.settings);

        tokio::spawn(async move {
            match &cursor {
                Some(c) => {
                    let bytes = c.as_bytes().to_vec();
                    with_settings(&settings, move |s| s.set(CURSOR_KEY, &bytes)).await?;
                }
                None => {
                    with_settings(&settings, |s| s.remove(CURSOR_KEY)).await?;
                }
            }

            debug!("Change cursor updated: {:?}", cursor);
            *current = cursor;
            Ok::<_, SyncError>(())
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }
}
