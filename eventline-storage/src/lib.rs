//! Local settings persistence for Eventline.
//!
//! The sync engine persists three values locally: the change cursor, the
//! push subscription identifier and this installation's client id. Both go through the
//! [`SettingsStore`] trait so the engine can be handed a SQLite-backed store
//! in production and an in-memory one in tests.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemorySettingsStore;
pub use sqlite::SqliteSettingsStore;

/// Settings key holding the persisted change cursor (opaque bytes).
pub const CURSOR_KEY: &str = "eventline.change_cursor";

/// Settings key holding the push subscription identifier (UTF-8).
pub const SUBSCRIPTION_KEY: &str = "eventline.subscription_id";

/// Settings key holding the installation's client id (UTF-8 UUID).
pub const CLIENT_ID_KEY: &str = "eventline.client_id";

/// Key/value settings storage.
///
/// Calls are blocking; async callers run them on the blocking pool.
pub trait SettingsStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes a value, replacing any previous one.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Reads a UTF-8 value.
    fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::InvalidData(format!("{key} is not UTF-8: {e}"))),
            None => Ok(None),
        }
    }

    /// Writes a UTF-8 value.
    fn set_string(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set(key, value.as_bytes())
    }
}
