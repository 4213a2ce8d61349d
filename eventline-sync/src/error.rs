//! Error types for the sync layer.

use eventline_storage::StorageError;
use eventline_types::RecordError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── Remote store ─────────────────────────────────────────────
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// The remote store rejected a request.
    #[error("server error {code}: {reason}")]
    Server { code: String, reason: String },

    /// The remote store no longer accepts this cursor. Recovering requires
    /// a backup-based resync, which is the host's decision.
    #[error("change token expired")]
    ChangeTokenExpired,

    /// Zone does not exist on the remote store.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// Record or subscription not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ── Local persistence ────────────────────────────────────────
    /// Settings storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record encoding error.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// A blocking storage task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    // ── Queue drain ──────────────────────────────────────────────
    /// A queued entry could not be decoded. The drain stopped at it.
    #[error("queued entry {entry} is unreadable: {reason}")]
    QueueDecode { entry: String, reason: String },

    /// A queued entry could not be delivered or removed. The drain stopped at it.
    #[error("queue drain stopped at {entry}: {source}")]
    QueueDrain {
        entry: String,
        #[source]
        source: Box<SyncError>,
    },

    // ── Concurrency conflicts ────────────────────────────────────
    /// A fetch is already in flight.
    #[error("a fetch is already in progress")]
    AlreadyFetching,

    /// A restore is already in flight.
    #[error("a restore is already in progress")]
    AlreadyRestoring,

    // ── Gating ───────────────────────────────────────────────────
    /// The host has not flipped the ready gate yet.
    #[error("not ready to fetch")]
    NotReadyToFetch,

    /// Fetching is blocked while a restore runs.
    #[error("restoring from backup")]
    RestoringFromBackup,

    // ── Backups ──────────────────────────────────────────────────
    /// No cursor has ever been recorded, so a snapshot could not be resumed.
    #[error("no change token recorded")]
    NoChangeToken,

    /// No backup candidate could be restored.
    #[error("no usable backup found")]
    NoCandidates,

    // ── Routing ──────────────────────────────────────────────────
    /// Two event types claim the same type identifier.
    #[error("type id already registered by another event type: {0}")]
    DuplicateTypeId(&'static str),
}

impl SyncError {
    /// Returns true for the single-flight rejections. The operation itself
    /// did not fail; the caller should retry once the other call finishes.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyFetching | Self::AlreadyRestoring)
    }

    /// Returns true if retrying the same call later can succeed without any
    /// change of local state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::AlreadyFetching | Self::AlreadyRestoring => {
                true
            }
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Server { code, .. } => matches!(
                code.as_str(),
                "THROTTLED"
                    | "SERVICE_UNAVAILABLE"
                    | "TRY_AGAIN_LATER"
                    | "429"
                    | "500"
                    | "502"
                    | "503"
                    | "504"
            ),
            Self::QueueDrain { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
