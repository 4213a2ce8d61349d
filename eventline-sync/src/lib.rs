//! Event-sourcing sync engine for Eventline.
//!
//! Application state changes are immutable events appended to a shared,
//! cursor-addressable log in a remote record store. Each device replays the
//! events it has not seen yet; nothing is overwritten, only appended.
//!
//! # Components
//!
//! - **Remote store**: the [`RecordStore`] capability and its in-memory and
//!   HTTP implementations
//! - **Cursor**: the single persisted "last synced position"
//! - **Upload queue**: uploads events, spooling failed ones to disk and
//!   replaying them later
//! - **Downloader**: single-flight incremental fetch that advances the
//!   cursor only after a complete fetch
//! - **Backups**: full-state snapshots for bootstrapping new devices
//! - **Router**: decodes fetched records into typed event streams
//! - **Coordinator**: the façade a host application drives
//!
//! # Example
//!
//! ```no_run
//! use eventline_storage::SqliteSettingsStore;
//! use eventline_sync::{MemoryRecordStore, SyncConfig, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # async fn run() -> eventline_sync::SyncResult<()> {
//! let config = SyncConfig {
//!     queue_dir: "/var/lib/myapp/queue".into(),
//!     ..Default::default()
//! };
//! let settings = Arc::new(SqliteSettingsStore::open("/var/lib/myapp/settings.db")?);
//! let coordinator =
//!     SyncCoordinator::new(config, Arc::new(MemoryRecordStore::new()), settings).await?;
//!
//! coordinator.create_zones().await?;
//! coordinator.set_ready_to_fetch(true);
//! let records = coordinator.fetch_events().await?;
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

pub mod backup;
mod config;
mod coordinator;
mod cursor;
pub mod downloader;
mod error;
mod guard;
pub mod notification;
pub mod queue;
pub mod remote;
pub mod router;

pub use backup::{BACKUP_RECORD_TYPE, BackupManager, BackupSnapshot};
pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncSignal};
pub use cursor::CursorManager;
pub use downloader::{Downloader, FetchedChanges};
pub use error::{SyncError, SyncResult};
pub use queue::{CLIENT_ID_FIELD, DrainReport, QueuedRecord, UploadOutcome, UploadQueue};
pub use remote::{
    HttpRecordStore, HttpStoreConfig, MemoryRecordStore, QueryFilter, RecordQuery, RecordStore,
    SortDescriptor, Subscription, ZoneChanges,
};
pub use router::{DecodeFailure, EventRouter};
