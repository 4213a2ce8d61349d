//! Engine configuration.

use eventline_types::{ClientId, ZoneId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`SyncCoordinator`](crate::SyncCoordinator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// This installation's identity. Stamped on every uploaded record and
    /// used to drop our own records from fetch results.
    ///
    /// `None` loads the id kept in the settings store, creating and storing
    /// one on first start. The id must stay the same across restarts, or
    /// queued records come back as another client's events.
    pub client_id: Option<ClientId>,
    /// Zone holding the shared event log.
    pub events_zone: String,
    /// Zone holding backup snapshots.
    pub backups_zone: String,
    /// Directory for events whose upload failed.
    pub queue_dir: PathBuf,
    /// Timeout for one incremental fetch (ms).
    pub fetch_timeout_ms: u64,
    /// Identifier used when registering the events zone subscription.
    pub subscription_id: String,
    /// Buffer size of every broadcast stream.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            events_zone: "Events".to_string(),
            backups_zone: "Backups".to_string(),
            queue_dir: std::env::temp_dir().join("eventline-queue"),
            fetch_timeout_ms: 30_000,
            subscription_id: "eventline-events".to_string(),
            channel_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Events zone id.
    pub fn events_zone(&self) -> ZoneId {
        ZoneId::new(self.events_zone.clone())
    }

    /// Backups zone id.
    pub fn backups_zone(&self) -> ZoneId {
        ZoneId::new(self.backups_zone.clone())
    }

    /// Fetch timeout as a duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
