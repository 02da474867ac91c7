#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },
    #[error("storage encode failed: {0}")]
    Encode(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// String key/value store with browser web-storage semantics.
///
/// Implementations must be callable through a shared reference; every
/// read-modify-write done by callers is a sequence of these calls.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

fn lock_items(
    items: &Mutex<BTreeMap<String, String>>,
) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
    items
        .lock()
        .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes once keys plus values would exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock_items(&self.items)?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = lock_items(&self.items)?;
        if let Some(quota) = self.quota_bytes {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        lock_items(&self.items)?.remove(key);
        Ok(())
    }
}

/// Storage that fails every call, like web storage in locked-down privacy modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStorage;

impl KeyValueStorage for UnavailableStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }
}

/// JSON-object file standing in for a browsing session across CLI runs.
/// A missing or corrupt file opens as empty.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::debug!(path = %path.display(), error = %err, "session file corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            items: Mutex::new(items),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(items)
            .map_err(|err| StorageError::Encode(err.to_string()))?;
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for JsonFileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock_items(&self.items)?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = lock_items(&self.items)?;
        items.insert(key.to_string(), value.to_string());
        self.flush(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = lock_items(&self.items)?;
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_client_storage_01_in_memory_round_trip_and_remove() {
        let s = InMemoryStorage::new();
        s.set_item("a", "1").unwrap();
        assert_eq!(s.get_item("a").unwrap().as_deref(), Some("1"));
        s.remove_item("a").unwrap();
        assert_eq!(s.get_item("a").unwrap(), None);
        assert!(s.is_empty());
    }

    #[test]
    fn at_client_storage_02_quota_rejects_oversized_write() {
        let s = InMemoryStorage::with_quota(8);
        s.set_item("k", "1234").unwrap();
        assert!(matches!(
            s.set_item("big", "123456789"),
            Err(StorageError::QuotaExceeded { .. })
        ));
        // overwriting the same key only counts the new value
        s.set_item("k", "1234567").unwrap();
    }

    #[test]
    fn at_client_storage_03_unavailable_storage_fails_every_call() {
        let s = UnavailableStorage;
        assert!(s.get_item("a").is_err());
        assert!(s.set_item("a", "b").is_err());
        assert!(s.remove_item("a").is_err());
    }

    #[test]
    fn at_client_storage_04_json_file_persists_and_tolerates_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        {
            let s = JsonFileStorage::open(&path);
            s.set_item("tracking_query_params", "{}").unwrap();
        }
        let reopened = JsonFileStorage::open(&path);
        assert_eq!(
            reopened.get_item("tracking_query_params").unwrap().as_deref(),
            Some("{}")
        );

        fs::write(&path, "not json").unwrap();
        let corrupt = JsonFileStorage::open(&path);
        assert_eq!(corrupt.get_item("tracking_query_params").unwrap(), None);
    }
}
