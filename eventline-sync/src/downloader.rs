//! Incremental download of remote events.

use crate::cursor::CursorManager;
use crate::error::{SyncError, SyncResult};
use crate::guard::FlightGuard;
use crate::queue::CLIENT_ID_FIELD;
use crate::remote::RecordStore;
use eventline_types::{ChangeCursor, ClientId, FieldValue, Record, RecordId, ZoneId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Changes returned by one fetch.
#[derive(Debug, Clone)]
pub struct FetchedChanges {
    /// Records authored by other clients.
    pub records: Vec<Record>,
    /// Records deleted since the starting cursor.
    pub deleted: Vec<RecordId>,
    /// Position after these changes.
    pub cursor: ChangeCursor,
    /// True if the result was truncated at `max_results`.
    pub more_coming: bool,
}

/// Fetches events written by other clients since the change cursor.
pub struct Downloader {
    store: Arc<dyn RecordStore>,
    cursor: Arc<CursorManager>,
    zone: ZoneId,
    client_id: ClientId,
    timeout: Duration,
    fetching: Arc<AtomicBool>,
}

impl Downloader {
    /// Creates a downloader for `zone`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cursor: Arc<CursorManager>,
        zone: ZoneId,
        client_id: ClientId,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cursor,
            zone,
            client_id,
            timeout,
            fetching: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while a [`fetch_and_advance`](Self::fetch_and_advance)
    /// is in flight.
    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }

    fn is_own(&self, record: &Record) -> bool {
        let ours = self.client_id.to_string();
        matches!(record.fields.get(CLIENT_ID_FIELD), Some(FieldValue::String(id)) if *id == ours)
    }

    /// Runs one change query after `cursor` (`None` = from the beginning).
    /// `max_results == 0` means unbounded.
    ///
    /// Does not read or write the cursor manager.
    pub async fn fetch_since(
        &self,
        cursor: Option<&ChangeCursor>,
        max_results: usize,
    ) -> SyncResult<FetchedChanges> {
        let changes = tokio::time::timeout(
            self.timeout,
            self.store.fetch_zone_changes(&self.zone, cursor, max_results),
        )
        .await
        .map_err(|_| SyncError::Timeout)??;

        let total = changes.records.len();
        let records: Vec<Record> = changes
            .records
            .into_iter()
            .filter(|r| !self.is_own(r))
            .collect();

        debug!(
            "Fetched {} records from {} ({} own skipped)",
            records.len(),
            self.zone,
            total - records.len()
        );

        Ok(FetchedChanges {
            records,
            deleted: changes.deleted,
            cursor: changes.cursor,
            more_coming: changes.more_coming,
        })
    }

    /// Fetches everything after the stored cursor (or `cursor_override`)
    /// and advances the stored cursor.
    ///
    /// The cursor is written only after the whole fetch succeeded. A call
    /// made while another is in flight fails with
    /// [`SyncError::AlreadyFetching`]. The fetch runs on its own task:
    /// dropping the returned future does not stop it, and the flag stays
    /// raised until it finishes.
    pub async fn fetch_and_advance(
        self: &Arc<Self>,
        cursor_override: Option<ChangeCursor>,
    ) -> SyncResult<Vec<Record>> {
        let flight = FlightGuard::try_acquire(&self.fetching).ok_or(SyncError::AlreadyFetching)?;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let _flight = flight;
            this.advance(cursor_override).await
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }

    async fn advance(&self, cursor_override: Option<ChangeCursor>) -> SyncResult<Vec<Record>> {
        let start = match cursor_override {
            Some(cursor) => Some(cursor),
            None => self.cursor.read().await?,
        };

        let fetched = match self.fetch_since(start.as_ref(), 0).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Fetch from {} failed: {}", self.zone, e);
                return Err(e);
            }
        };

        self.cursor.write(Some(fetched.cursor)).await?;
        info!("Fetched {} new events", fetched.records.len());
        Ok(fetched.records)
    }
}
