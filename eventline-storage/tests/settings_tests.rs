use eventline_storage::{
    MemorySettingsStore, SettingsStore, SqliteSettingsStore, StorageError, CURSOR_KEY,
    SUBSCRIPTION_KEY,
};
use tempfile::TempDir;

fn exercise(store: &dyn SettingsStore) {
    assert!(store.get(CURSOR_KEY).unwrap().is_none());

    store.set(CURSOR_KEY, &[1, 2, 3]).unwrap();
    assert_eq!(store.get(CURSOR_KEY).unwrap(), Some(vec![1, 2, 3]));

    store.set(CURSOR_KEY, &[4]).unwrap();
    assert_eq!(store.get(CURSOR_KEY).unwrap(), Some(vec![4]));

    store.set_string(SUBSCRIPTION_KEY, "sub-1").unwrap();
    assert_eq!(
        store.get_string(SUBSCRIPTION_KEY).unwrap().as_deref(),
        Some("sub-1")
    );

    store.remove(CURSOR_KEY).unwrap();
    assert!(store.get(CURSOR_KEY).unwrap().is_none());

    // Removing twice is fine.
    store.remove(CURSOR_KEY).unwrap();
}

// ── In-memory ───────────────────────────────────────────────────

#[test]
fn memory_store_get_set_remove() {
    let store = MemorySettingsStore::new();
    exercise(&store);
    assert_eq!(store.len(), 1);
}

#[test]
fn memory_store_starts_empty() {
    assert!(MemorySettingsStore::new().is_empty());
}

#[test]
fn get_string_rejects_non_utf8() {
    let store = MemorySettingsStore::new();
    store.set(SUBSCRIPTION_KEY, &[0xff, 0xfe]).unwrap();
    assert!(matches!(
        store.get_string(SUBSCRIPTION_KEY),
        Err(StorageError::InvalidData(_))
    ));
}

// ── SQLite ──────────────────────────────────────────────────────

#[test]
fn sqlite_store_in_memory() {
    let store = SqliteSettingsStore::open_in_memory().unwrap();
    exercise(&store);
}

#[test]
fn sqlite_store_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("settings.sqlite");

    {
        let store = SqliteSettingsStore::open(&path).unwrap();
        store.set(CURSOR_KEY, b"cursor-9").unwrap();
    }

    let store = SqliteSettingsStore::open(&path).unwrap();
    assert_eq!(store.get(CURSOR_KEY).unwrap(), Some(b"cursor-9".to_vec()));
}
