//! Cache Storage Module
//!
//! Backends a cache can mirror itself into, keyed by the cache prefix.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, CacheStats};
use crate::error::Result;

// == Storage Kind ==
/// Where a cache persists its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Not persisted
    #[default]
    Memory,
    /// Shared by every cache in the process, lost on exit
    Session,
    /// JSON files on disk, survive restarts
    Local,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "session" | "sessionstorage" => Ok(StorageKind::Session),
            "local" | "localstorage" => Ok(StorageKind::Local),
            other => Err(format!("unknown storage kind: {}", other)),
        }
    }
}

impl StorageKind {
    /// Resolves the backend for this kind. `Memory` has none.
    pub fn backend(
        &self,
        session: &SessionStorage,
        local_dir: &Path,
    ) -> Option<Arc<dyn CacheStorage>> {
        match self {
            StorageKind::Memory => None,
            StorageKind::Session => Some(Arc::new(session.clone())),
            StorageKind::Local => Some(Arc::new(LocalStorage::new(local_dir))),
        }
    }
}

// == Persist Policy ==
/// When a storage-backed cache writes its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistPolicy {
    /// Re-serialize the whole cache after every mutation
    #[default]
    WriteThrough,
    /// Mark dirty on mutation, write on `flush`
    WriteBehind,
}

impl FromStr for PersistPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write-through" | "writethrough" => Ok(PersistPolicy::WriteThrough),
            "write-behind" | "writebehind" => Ok(PersistPolicy::WriteBehind),
            other => Err(format!("unknown persist policy: {}", other)),
        }
    }
}

// == Persisted Layout ==
/// On-storage layout: `{ "entries": [[key, entry], ...], "stats": {...} }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedCache<T> {
    pub entries: Vec<(String, CacheEntry<T>)>,
    pub stats: CacheStats,
}

/// Borrowing twin of [`PersistedCache`] used when saving.
#[derive(Serialize)]
pub(crate) struct PersistedCacheRef<'a, T> {
    pub entries: Vec<(&'a String, &'a CacheEntry<T>)>,
    pub stats: &'a CacheStats,
}

// == Storage Backend Trait ==
/// A string key/value store holding serialized cache snapshots.
pub trait CacheStorage: Send + Sync + fmt::Debug {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, blob: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

// == Session Storage ==
/// Process-scoped storage. Clones share the same items.
#[derive(Debug, Clone, Default)]
pub struct SessionStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for SessionStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        self.items.write().insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.items.write().remove(key);
        Ok(())
    }
}

// == Local Storage ==
/// One JSON file per key under a directory.
///
/// IO is blocking and runs while the owning cache is locked. Blobs are
/// bounded by the cache's `max_size`; under `PersistPolicy::WriteBehind`
/// writes happen only on `flush`, off the request path.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl CacheStorage for LocalStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Write then rename: readers never see a partial blob.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_storage_shared_between_clones() {
        let storage = SessionStorage::new();
        let other = storage.clone();

        storage.save("session-cache", "{}").unwrap();
        assert_eq!(other.load("session-cache").unwrap().as_deref(), Some("{}"));

        other.remove("session-cache").unwrap();
        assert!(storage.load("session-cache").unwrap().is_none());
    }

    #[test]
    fn test_local_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("nested"));

        assert!(storage.load("persistent-cache").unwrap().is_none());
        storage.save("persistent-cache", r#"{"entries":[]}"#).unwrap();
        assert_eq!(
            storage.load("persistent-cache").unwrap().as_deref(),
            Some(r#"{"entries":[]}"#)
        );
        assert!(dir.path().join("nested/persistent-cache.json").exists());
    }

    #[test]
    fn test_local_storage_key_cannot_escape_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.save("../../evil", "x").unwrap();
        assert!(dir.path().join("______evil.json").exists());
    }

    #[test]
    fn test_local_storage_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.remove("nothing").is_ok());
    }

    #[test]
    fn test_backend_for_kind() {
        let session = SessionStorage::new();
        let dir = tempfile::tempdir().unwrap();

        assert!(StorageKind::Memory.backend(&session, dir.path()).is_none());

        let backend = StorageKind::Session.backend(&session, dir.path()).unwrap();
        backend.save("k", "v").unwrap();
        assert_eq!(session.load("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("localStorage".parse::<StorageKind>(), Ok(StorageKind::Local));
        assert_eq!("session".parse::<StorageKind>(), Ok(StorageKind::Session));
        assert_eq!(
            "write-behind".parse::<PersistPolicy>(),
            Ok(PersistPolicy::WriteBehind)
        );
        assert!("disk".parse::<StorageKind>().is_err());
    }
}
