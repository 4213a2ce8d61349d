//! The engine façade.
//!
//! `SyncCoordinator` wires the cursor manager, upload queue, downloader,
//! backup manager and event router around one remote store and one
//! settings store, and exposes what a host application drives: uploads,
//! fetches, backups, the ready gate and notification handling.

use crate::backup::BackupManager;
use crate::config::SyncConfig;
use crate::cursor::{CursorManager, with_settings};
use crate::downloader::Downloader;
use crate::error::{SyncError, SyncResult};
use crate::notification;
use crate::queue::{DrainReport, UploadOutcome, UploadQueue};
use crate::remote::{RecordStore, Subscription};
use crate::router::{DecodeFailure, EventRouter, into_stream};
use eventline_storage::{CLIENT_ID_KEY, SUBSCRIPTION_KEY, SettingsStore, StorageError};
use eventline_types::{ChangeCursor, ClientId, Record, SyncEvent};
use futures::Stream;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Engine-level notifications for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    /// A backup was restored and its cursor adopted. The host should fetch.
    BackupRestored { cursor: ChangeCursor },
    /// The cursor and subscription were cleared.
    Reset,
}

/// Event-sourcing sync engine.
pub struct SyncCoordinator {
    config: SyncConfig,
    client_id: ClientId,
    store: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsStore>,
    cursor: Arc<CursorManager>,
    queue: UploadQueue,
    downloader: Arc<Downloader>,
    backups: Arc<BackupManager>,
    router: EventRouter,
    ready_to_fetch: AtomicBool,
    signals: broadcast::Sender<SyncSignal>,
}

impl SyncCoordinator {
    /// Builds the engine, loading the persisted cursor from `settings`.
    pub async fn new(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> SyncResult<Self> {
        let client_id = resolve_client_id(config.client_id, &settings).await?;
        let cursor = Arc::new(CursorManager::load(Arc::clone(&settings)).await?);
        let queue = UploadQueue::new(
            Arc::clone(&store),
            config.queue_dir.clone(),
            config.events_zone(),
            client_id,
        );
        let downloader = Arc::new(Downloader::new(
            Arc::clone(&store),
            Arc::clone(&cursor),
            config.events_zone(),
            client_id,
            config.fetch_timeout(),
        ));
        let backups = Arc::new(BackupManager::new(
            Arc::clone(&store),
            Arc::clone(&downloader),
            Arc::clone(&cursor),
            config.backups_zone(),
        ));
        let router = EventRouter::new(config.channel_capacity);
        let (signals, _) = broadcast::channel(config.channel_capacity.max(1));

        info!(
            "Sync coordinator for client {} using {}",
            client_id,
            store.provider_name()
        );

        Ok(Self {
            config,
            client_id,
            store,
            settings,
            cursor,
            queue,
            downloader,
            backups,
            router,
            ready_to_fetch: AtomicBool::new(false),
            signals,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns this installation's client id.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Returns the upload queue.
    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    /// Returns the downloader.
    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    /// Returns the backup manager.
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    // ── Setup ────────────────────────────────────────────────────

    /// Creates the events and backups zones. Safe to call repeatedly.
    pub async fn create_zones(&self) -> SyncResult<()> {
        self.store
            .create_zones(&[self.config.events_zone(), self.config.backups_zone()])
            .await
    }

    /// Registers the events zone subscription unless one is already
    /// recorded, and returns its id.
    pub async fn subscribe_to_notifications(&self) -> SyncResult<String> {
        if let Some(existing) = self.stored_subscription_id().await? {
            debug!("Already subscribed as {}", existing);
            return Ok(existing);
        }

        let subscription = Subscription {
            id: self.config.subscription_id.clone(),
            zone: self.config.events_zone(),
        };
        let id = self.store.save_subscription(&subscription).await?;

        let stored = id.clone();
        with_settings(&self.settings, move |s| s.set_string(SUBSCRIPTION_KEY, &stored)).await?;
        info!("Subscribed to {} as {}", subscription.zone, id);
        Ok(id)
    }

    async fn stored_subscription_id(&self) -> SyncResult<Option<String>> {
        with_settings(&self.settings, |s| s.get_string(SUBSCRIPTION_KEY)).await
    }

    // ── Upload ───────────────────────────────────────────────────

    /// Uploads an event and publishes it locally, whether it was delivered
    /// or queued.
    pub async fn upload_event<E: SyncEvent>(&self, event: &E) -> SyncResult<UploadOutcome> {
        let outcome = self.queue.upload_event(event).await?;
        self.router.publish(outcome.record());
        Ok(outcome)
    }

    /// Replays queued uploads. The records were published when first
    /// uploaded, so they are not published again.
    pub async fn upload_queued_events(&self) -> SyncResult<DrainReport> {
        self.queue.drain().await
    }

    // ── Download ─────────────────────────────────────────────────

    /// Opens or closes the fetch gate.
    pub fn set_ready_to_fetch(&self, ready: bool) {
        self.ready_to_fetch.store(ready, Ordering::SeqCst);
    }

    /// Returns the fetch gate.
    pub fn is_ready_to_fetch(&self) -> bool {
        self.ready_to_fetch.load(Ordering::SeqCst)
    }

    /// Returns true while a fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.downloader.is_fetching()
    }

    /// Fetches new remote events, advances the cursor, and publishes the
    /// records newest first. Returns them in the same order.
    pub async fn fetch_events(&self) -> SyncResult<Vec<Record>> {
        if self.backups.is_restoring() {
            return Err(SyncError::RestoringFromBackup);
        }
        if !self.is_ready_to_fetch() {
            return Err(SyncError::NotReadyToFetch);
        }

        let mut records = self.downloader.fetch_and_advance(None).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for record in &records {
            self.router.publish(record);
        }
        Ok(records)
    }

    /// Fetches if `payload` was sent for our subscription. Other payloads
    /// are ignored and return `None`.
    pub async fn handle_notification(
        &self,
        payload: &serde_json::Value,
    ) -> SyncResult<Option<Vec<Record>>> {
        let Some(incoming) = notification::subscription_id(payload) else {
            debug!("Notification without subscription id, ignoring");
            return Ok(None);
        };

        match self.stored_subscription_id().await? {
            Some(ours) if ours == incoming => self.fetch_events().await.map(Some),
            _ => {
                debug!("Notification for foreign subscription {}, ignoring", incoming);
                Ok(None)
            }
        }
    }

    // ── Backups ──────────────────────────────────────────────────

    /// Uploads a snapshot blob tagged with the current cursor.
    pub async fn upload_backup(&self, schema_version: i64, blob_path: &Path) -> SyncResult<Record> {
        self.backups.upload_backup(schema_version, blob_path).await
    }

    /// Snapshots for `schema_version`, newest first.
    pub async fn list_backups(&self, schema_version: i64) -> SyncResult<Vec<Record>> {
        self.backups.list_backups(schema_version).await
    }

    /// Keeps the newest `keep_most_recent` snapshots, deletes the rest.
    pub async fn clean_backups(
        &self,
        keep_most_recent: usize,
        schema_version: i64,
    ) -> SyncResult<usize> {
        self.backups
            .clean_backups(keep_most_recent, schema_version)
            .await
    }

    /// Restores the newest usable snapshot, adopts its cursor and emits
    /// [`SyncSignal::BackupRestored`]. Fetching afterwards is up to the host.
    ///
    /// Dropping the returned future does not stop the restore; the signal
    /// is still sent when it completes.
    pub async fn restore_from_backup<F, Fut>(
        &self,
        schema_version: i64,
        migrate: F,
    ) -> SyncResult<ChangeCursor>
    where
        F: FnMut(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let backups = Arc::clone(&self.backups);
        let signals = self.signals.clone();

        tokio::spawn(async move {
            let cursor = backups.restore_from_backup(schema_version, migrate).await?;
            let _ = signals.send(SyncSignal::BackupRestored {
                cursor: cursor.clone(),
            });
            Ok::<_, SyncError>(cursor)
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }

    /// Returns true while a restore is in flight.
    pub fn is_restoring(&self) -> bool {
        self.backups.is_restoring()
    }

    // ── Cursor ───────────────────────────────────────────────────

    /// Returns the persisted cursor.
    pub async fn current_cursor(&self) -> SyncResult<Option<ChangeCursor>> {
        self.cursor.read().await
    }

    /// Replaces the persisted cursor.
    pub async fn set_cursor(&self, cursor: Option<ChangeCursor>) -> SyncResult<()> {
        self.cursor.write(cursor).await
    }

    /// Clears the cursor, deletes the remote subscription if one was
    /// registered, and forgets its id.
    pub async fn reset(&self) -> SyncResult<()> {
        self.cursor.write(None).await?;

        if let Some(id) = self.stored_subscription_id().await? {
            self.store.delete_subscription(&id).await?;
            with_settings(&self.settings, |s| s.remove(SUBSCRIPTION_KEY)).await?;
            info!("Removed subscription {}", id);
        }

        let _ = self.signals.send(SyncSignal::Reset);
        Ok(())
    }

    // ── Streams ──────────────────────────────────────────────────

    /// Decoded events of type `E`.
    pub fn events<E: SyncEvent>(&self) -> SyncResult<broadcast::Receiver<E>> {
        self.router.subscribe::<E>()
    }

    /// Decoded events of type `E` as a stream.
    pub fn event_stream<E: SyncEvent>(&self) -> SyncResult<impl Stream<Item = E> + Send + use<E>> {
        Ok(into_stream(self.router.subscribe::<E>()?))
    }

    /// Every published record.
    pub fn records(&self) -> broadcast::Receiver<Record> {
        self.router.records()
    }

    /// Records that matched an event type but failed to decode.
    pub fn decode_failures(&self) -> broadcast::Receiver<DecodeFailure> {
        self.router.decode_failures()
    }

    /// Engine signals.
    pub fn signals(&self) -> broadcast::Receiver<SyncSignal> {
        self.signals.subscribe()
    }
}

/// Uses the configured client id, or the stored one, or a new one, and
/// keeps whichever it picked in `settings`.
async fn resolve_client_id(
    configured: Option<ClientId>,
    settings: &Arc<dyn SettingsStore>,
) -> SyncResult<ClientId> {
    if let Some(id) = configured {
        let stored = id.to_string();
        with_settings(settings, move |s| s.set_string(CLIENT_ID_KEY, &stored)).await?;
        return Ok(id);
    }

    if let Some(stored) = with_settings(settings, |s| s.get_string(CLIENT_ID_KEY)).await? {
        return ClientId::parse(&stored).map_err(|e| {
            StorageError::InvalidData(format!("{CLIENT_ID_KEY} is not a client id: {e}")).into()
        });
    }

    let id = ClientId::new();
    let stored = id.to_string();
    with_settings(settings, move |s| s.set_string(CLIENT_ID_KEY, &stored)).await?;
    info!("Created client id {}", id);
    Ok(id)
}
