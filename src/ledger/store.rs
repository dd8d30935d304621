use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Durable string key-value storage backing the stream ledger.
///
/// A call returns only after the write is durable for the backend, so a crash
/// right after `set` never loses the acknowledged value.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> AppResult<()>;

    fn remove(&self, key: &str) -> AppResult<()>;

    /// Writes several keys. Backends with a costly flush override this to
    /// persist them in one write.
    fn set_many(&self, pairs: &[(String, String)]) -> AppResult<()> {
        for (key, value) in pairs {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Removes several keys; overriding backends make this a single write.
    fn remove_many(&self, keys: &[String]) -> AppResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Non-durable store, for tests and for running without a ledger file.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// The whole map is rewritten after every mutation through a temp file and a
/// rename, so the file on disk is always a complete snapshot. The in-memory
/// copy only changes once the snapshot is on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|source| {
                AppError::LedgerCorrupt { path: path.clone(), source }
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(AppError::LedgerIo { path, source }),
        };
        debug!("Opened ledger at {} with {} keys", path.display(), entries.len());
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AppError {
        AppError::LedgerIo { path: self.path.clone(), source }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string(entries).map_err(|source| {
            AppError::LedgerCorrupt { path: self.path.clone(), source }
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Applies `change` to a copy of the map, persists it, then publishes it.
    /// Skips the write when `change` reports nothing changed.
    fn mutate(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> AppResult<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        })
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn set_many(&self, pairs: &[(String, String)]) -> AppResult<()> {
        self.mutate(|entries| {
            let mut changed = false;
            for (key, value) in pairs {
                changed |= entries.insert(key.clone(), value.clone()).as_ref() != Some(value);
            }
            changed
        })
    }

    fn remove_many(&self, keys: &[String]) -> AppResult<()> {
        self.mutate(|entries| {
            let mut changed = false;
            for key in keys {
                changed |= entries.remove(key).is_some();
            }
            changed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_set_get_remove() {
        let store = InMemoryStore::new();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove_many(&["a".to_string(), "missing".to_string()]).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        let store = JsonFileStore::open(&path).unwrap();
        store
            .set_many(&[("k1".into(), "v1".into()), ("k2".into(), "v2".into())])
            .unwrap();
        store.remove("k1").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k1").unwrap(), None);
        assert_eq!(reopened.get("k2").unwrap().as_deref(), Some("v2"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_flush_leaves_entries_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.set("k1", "v1").unwrap();

        // A non-empty directory in place of the file makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), "").unwrap();

        let err = store.set("k2", "v2").unwrap_err();
        assert!(matches!(err, AppError::LedgerIo { .. }), "{err:?}");
        assert!(store.remove("k1").is_err());
        assert_eq!(store.get("k1").unwrap().as_deref(), Some("v1"));
        assert_eq!(store.get("k2").unwrap(), None);
    }

    #[test]
    fn json_store_writes_compact_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.set_many(&[("a".into(), "1".into()), ("b".into(), "2".into())]).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, AppError::LedgerCorrupt { .. }));
    }

    #[test]
    fn json_store_treats_empty_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
        assert_eq!(store.path(), path.as_path());
    }
}
