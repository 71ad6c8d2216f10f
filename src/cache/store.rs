//! Cache Manager Module
//!
//! Bounded, expiring key-value store with strategy-selected eviction and
//! optional mirroring to a storage backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::storage::{PersistedCache, PersistedCacheRef};
use crate::cache::{
    CacheEntry, CacheStats, CacheStorage, Clock, EvictionStrategy, PersistPolicy, SystemClock,
};

// == Cache Options ==
/// Construction parameters for a [`CacheManager`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Time to live in milliseconds, measured from insertion
    pub ttl_ms: u64,
    /// Maximum number of entries
    pub max_size: usize,
    /// Eviction strategy once `max_size` is exceeded
    pub strategy: EvictionStrategy,
    /// Namespace for keys and the storage key of the persisted blob
    pub prefix: String,
    /// When storage-backed caches write their snapshot
    pub persist: PersistPolicy,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl_ms: 5 * 60 * 1000,
            max_size: 100,
            strategy: EvictionStrategy::Lru,
            prefix: "cache".to_string(),
            persist: PersistPolicy::WriteThrough,
        }
    }
}

// == Cache Manager ==
/// Expiring, bounded cache of `T` values.
///
/// Keys are namespaced as `prefix:key`. Expired entries are dropped lazily
/// on access or in bulk by [`CacheManager::cleanup`]. Storage failures are
/// logged and never propagated: the in-memory map stays authoritative.
#[derive(Debug)]
pub struct CacheManager<T> {
    entries: HashMap<String, CacheEntry<T>>,
    options: CacheOptions,
    stats: CacheStats,
    storage: Option<Arc<dyn CacheStorage>>,
    clock: Arc<dyn Clock>,
    next_seq: u64,
    dirty: bool,
}

impl<T> CacheManager<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    // == Constructors ==
    /// Creates an in-memory cache.
    pub fn new(options: CacheOptions) -> Self {
        let stats = CacheStats::new(options.max_size);
        Self {
            entries: HashMap::new(),
            options,
            stats,
            storage: None,
            clock: Arc::new(SystemClock),
            next_seq: 0,
            dirty: false,
        }
    }

    /// Creates a cache mirrored to `storage`, restoring any snapshot saved
    /// under the configured prefix.
    pub fn with_storage(options: CacheOptions, storage: Arc<dyn CacheStorage>) -> Self {
        let mut cache = Self::new(options);
        cache.storage = Some(storage);
        cache.load_from_storage();
        cache
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.options.prefix, key)
    }

    fn is_expired(&self, entry: &CacheEntry<T>, now: u64) -> bool {
        entry.is_expired(now, self.options.ttl_ms)
    }

    // == Get ==
    /// Returns the value for `key` if present and not expired.
    ///
    /// Expired entries are removed and counted as misses. Hits bump the
    /// entry's access count and last-access time.
    pub fn get(&mut self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let now = self.clock.now_ms();

        let expired = match self.entries.get(&full_key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            self.entries.remove(&full_key);
            self.stats.record_miss();
            self.sync_size();
            self.persist();
            return None;
        }

        let entry = self.entries.get_mut(&full_key)?;
        entry.touch(now);
        let data = entry.data.clone();
        self.stats.record_hit();
        Some(data)
    }

    // == Set ==
    /// Inserts or replaces `key`, resetting its timestamp and access count.
    ///
    /// When the insert takes the cache over capacity, exactly one entry is
    /// evicted according to the strategy. The fresh entry competes like any
    /// other: under LFU it can be the victim.
    pub fn set(&mut self, key: &str, data: T) {
        let full_key = self.full_key(key);
        let now = self.clock.now_ms();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries
            .insert(full_key, CacheEntry::new(data, now, seq));

        if self.entries.len() > self.options.max_size {
            self.evict();
        }

        self.sync_size();
        self.persist();
    }

    fn evict(&mut self) -> bool {
        let Some(victim) = self.options.strategy.select_victim(self.entries.iter()) else {
            return false;
        };
        self.entries.remove(&victim);
        self.stats.record_eviction();
        debug!(
            key = %victim,
            strategy = %self.options.strategy,
            "evicted cache entry"
        );
        true
    }

    // == Delete ==
    /// Removes `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        let full_key = self.full_key(key);
        let deleted = self.entries.remove(&full_key).is_some();
        if deleted {
            self.sync_size();
            self.persist();
        }
        deleted
    }

    /// Removes every key starting with `prefix` (un-namespaced).
    /// Returns the number removed.
    pub fn delete_prefix(&mut self, prefix: &str) -> usize {
        let full_prefix = self.full_key(prefix);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&full_prefix));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.sync_size();
            self.persist();
        }
        removed
    }

    // == Has ==
    /// Like [`CacheManager::get`] without touching statistics or access
    /// metadata. Expired entries are still removed.
    pub fn has(&mut self, key: &str) -> bool {
        let full_key = self.full_key(key);
        let now = self.clock.now_ms();

        let expired = match self.entries.get(&full_key) {
            None => return false,
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            self.entries.remove(&full_key);
            self.sync_size();
            self.persist();
            return false;
        }
        true
    }

    // == Clear ==
    /// Drops every entry and resets statistics. A storage-backed cache also
    /// removes its snapshot.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats.reset();
        self.sync_size();
        self.remove_storage();
    }

    // == Cleanup ==
    /// Removes all expired entries in one pass. Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let ttl_ms = self.options.ttl_ms;
        let before = self.entries.len();

        self.entries
            .retain(|_, entry| !entry.is_expired(now, ttl_ms));

        let removed = before - self.entries.len();
        self.sync_size();
        self.persist();
        removed
    }

    // == Stats ==
    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_size(self.entries.len());
        stats
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Un-namespaced keys currently held, expired or not.
    pub fn keys(&self) -> Vec<String> {
        let skip = self.options.prefix.len() + 1;
        self.entries
            .keys()
            .map(|key| key.get(skip..).unwrap_or_default().to_string())
            .collect()
    }

    // == Persistence ==
    /// Writes the snapshot if a write-behind cache has pending changes.
    /// Returns whether a write happened.
    pub fn flush(&mut self) -> bool {
        if !self.dirty || self.storage.is_none() {
            return false;
        }
        self.write_storage();
        true
    }

    /// True when a write-behind cache holds changes not yet in storage.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn sync_size(&mut self) {
        self.stats.set_size(self.entries.len());
    }

    fn persist(&mut self) {
        if self.storage.is_none() {
            return;
        }
        match self.options.persist {
            PersistPolicy::WriteThrough => self.write_storage(),
            PersistPolicy::WriteBehind => self.dirty = true,
        }
    }

    fn write_storage(&mut self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let snapshot = PersistedCacheRef {
            entries: self.entries.iter().collect(),
            stats: &self.stats,
        };

        let outcome = serde_json::to_string(&snapshot)
            .map_err(Into::into)
            .and_then(|blob| storage.save(&self.options.prefix, &blob));

        match outcome {
            Ok(()) => self.dirty = false,
            Err(err) => warn!(
                prefix = %self.options.prefix,
                error = %err,
                "failed to save cache to storage"
            ),
        }
    }

    fn remove_storage(&mut self) {
        let Some(storage) = &self.storage else {
            return;
        };
        match storage.remove(&self.options.prefix) {
            Ok(()) => self.dirty = false,
            Err(err) => warn!(
                prefix = %self.options.prefix,
                error = %err,
                "failed to remove cache snapshot"
            ),
        }
    }

    fn load_from_storage(&mut self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let blob = match storage.load(&self.options.prefix) {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(err) => {
                warn!(prefix = %self.options.prefix, error = %err, "failed to load cache from storage");
                return;
            }
        };

        match serde_json::from_str::<PersistedCache<T>>(&blob) {
            Ok(persisted) => {
                self.next_seq = persisted
                    .entries
                    .iter()
                    .map(|(_, entry)| entry.seq + 1)
                    .max()
                    .unwrap_or(0);
                self.entries = persisted.entries.into_iter().collect();
                self.stats = persisted.stats;
                self.stats.max_size = self.options.max_size;
                debug!(
                    prefix = %self.options.prefix,
                    entries = self.entries.len(),
                    "restored cache from storage"
                );

                // A snapshot taken under a larger max_size is trimmed now.
                let mut trimmed = 0;
                while self.entries.len() > self.options.max_size && self.evict() {
                    trimmed += 1;
                }
                self.sync_size();
                if trimmed > 0 {
                    info!(
                        prefix = %self.options.prefix,
                        trimmed,
                        max_size = self.options.max_size,
                        "restored snapshot exceeded capacity"
                    );
                    self.persist();
                }
            }
            Err(err) => {
                warn!(prefix = %self.options.prefix, error = %err, "discarding unreadable cache snapshot");
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalStorage, ManualClock, SessionStorage};
    use crate::error::{CacheError, Result};

    fn manager(max_size: usize, strategy: EvictionStrategy) -> (CacheManager<String>, ManualClock) {
        let clock = ManualClock::new(1_000);
        let options = CacheOptions {
            ttl_ms: 1_000,
            max_size,
            strategy,
            prefix: "test".to_string(),
            ..CacheOptions::default()
        };
        let cache = CacheManager::new(options).with_clock(Arc::new(clock.clone()));
        (cache, clock)
    }

    fn set(cache: &mut CacheManager<String>, key: &str) {
        cache.set(key, format!("value-{}", key));
    }

    #[test]
    fn test_set_and_get() {
        let (mut cache, _) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        assert_eq!(cache.get("key1").as_deref(), Some("value-key1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_missing_counts_miss() {
        let (mut cache, _) = manager(10, EvictionStrategy::Lru);

        assert_eq!(cache.get("nothing"), None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_overwrite_resets_access() {
        let (mut cache, clock) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        cache.get("key1");
        clock.advance(500);
        cache.set("key1", "fresh".to_string());

        // Fresh timestamp: still alive 900ms after the overwrite
        clock.advance(900);
        assert_eq!(cache.get("key1").as_deref(), Some("fresh"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiration_is_a_miss() {
        let (mut cache, clock) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        clock.advance(1_000);
        assert!(cache.get("key1").is_some());

        clock.advance(1);
        assert_eq!(cache.get("key1"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_has_does_not_touch_stats() {
        let (mut cache, clock) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        assert!(cache.has("key1"));
        assert!(!cache.has("key2"));
        clock.advance(2_000);
        assert!(!cache.has("key1"));

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete() {
        let (mut cache, _) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert!(cache.get("key1").is_none());
    }

    #[test]
    fn test_delete_prefix() {
        let (mut cache, _) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "users:1");
        set(&mut cache, "users:2");
        set(&mut cache, "housing:1");

        assert_eq!(cache.delete_prefix("users:"), 2);
        assert_eq!(cache.keys(), vec!["housing:1".to_string()]);
    }

    #[test]
    fn test_clear_resets_stats() {
        let (mut cache, _) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        cache.get("key1");
        cache.get("key2");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::new(10));
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let (mut cache, clock) = manager(10, EvictionStrategy::Lru);

        set(&mut cache, "old");
        clock.advance(600);
        set(&mut cache, "young");
        clock.advance(600);

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.keys(), vec!["young".to_string()]);
    }

    #[test]
    fn test_lru_eviction() {
        let (mut cache, clock) = manager(3, EvictionStrategy::Lru);

        set(&mut cache, "key1");
        clock.advance(1);
        set(&mut cache, "key2");
        clock.advance(1);
        set(&mut cache, "key3");
        clock.advance(1);

        // Reading key1 makes key2 the least recently used
        cache.get("key1");
        clock.advance(1);
        set(&mut cache, "key4");

        assert_eq!(cache.len(), 3);
        assert!(!cache.has("key2"));
        assert!(cache.has("key1"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lfu_eviction() {
        let (mut cache, clock) = manager(3, EvictionStrategy::Lfu);

        set(&mut cache, "a");
        set(&mut cache, "b");
        set(&mut cache, "c");
        cache.get("a");
        cache.get("a");
        cache.get("c");
        clock.advance(1);

        // b was never read and is older than d
        set(&mut cache, "d");
        assert!(!cache.has("b"));
        assert!(cache.has("a"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
    }

    #[test]
    fn test_lfu_can_evict_newcomer() {
        let (mut cache, _) = manager(2, EvictionStrategy::Lfu);

        set(&mut cache, "a");
        set(&mut cache, "b");
        cache.get("a");
        cache.get("b");

        set(&mut cache, "c");
        assert!(!cache.has("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_fifo_ignores_reads() {
        let (mut cache, clock) = manager(2, EvictionStrategy::Fifo);

        set(&mut cache, "first");
        clock.advance(1);
        set(&mut cache, "second");
        clock.advance(1);
        cache.get("first");
        cache.get("first");

        set(&mut cache, "third");
        assert!(!cache.has("first"));
        assert!(cache.has("second"));
    }

    #[test]
    fn test_equal_timestamps_evict_earliest_insert() {
        let (mut cache, _) = manager(2, EvictionStrategy::Fifo);

        set(&mut cache, "x");
        set(&mut cache, "y");
        set(&mut cache, "z");
        assert!(!cache.has("x"));
    }

    fn persistent(storage: Arc<dyn CacheStorage>, policy: PersistPolicy) -> CacheManager<String> {
        let options = CacheOptions {
            prefix: "persistent-cache".to_string(),
            persist: policy,
            ..CacheOptions::default()
        };
        CacheManager::with_storage(options, storage)
    }

    #[test]
    fn test_write_through_survives_new_instance() {
        let storage: Arc<dyn CacheStorage> = Arc::new(SessionStorage::new());

        let mut first = persistent(storage.clone(), PersistPolicy::WriteThrough);
        first.set("key1", "value1".to_string());
        // A miss that expires nothing does not write; the next set does
        first.get("missing");
        first.set("key2", "value2".to_string());

        let mut second = persistent(storage, PersistPolicy::WriteThrough);
        // Stats are restored alongside the entries
        assert_eq!(second.stats().misses, 1);
        assert_eq!(second.stats().size, 2);
        assert_eq!(second.get("key1").as_deref(), Some("value1"));
    }

    #[test]
    fn test_persisted_layout() {
        let storage = SessionStorage::new();
        let mut cache = persistent(Arc::new(storage.clone()), PersistPolicy::WriteThrough);
        cache.set("key1", "value1".to_string());

        let blob = storage.load("persistent-cache").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(json["entries"][0][0], "persistent-cache:key1");
        assert_eq!(json["entries"][0][1]["data"], "value1");
        assert_eq!(json["stats"]["size"], 1);
    }

    #[test]
    fn test_write_behind_waits_for_flush() {
        let storage = SessionStorage::new();
        let mut cache = persistent(Arc::new(storage.clone()), PersistPolicy::WriteBehind);

        cache.set("key1", "value1".to_string());
        cache.set("key2", "value2".to_string());
        assert!(cache.is_dirty());
        assert!(storage.load("persistent-cache").unwrap().is_none());

        assert!(cache.flush());
        assert!(!cache.is_dirty());
        assert!(!cache.flush());
        assert!(storage.load("persistent-cache").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_snapshot_degrades_to_empty() {
        let storage = SessionStorage::new();
        storage.save("persistent-cache", "{not json").unwrap();

        let mut cache = persistent(Arc::new(storage), PersistPolicy::WriteThrough);
        assert!(cache.is_empty());
        cache.set("key1", "value1".to_string());
        assert!(cache.has("key1"));
    }

    #[derive(Debug)]
    struct BrokenStorage;

    impl CacheStorage for BrokenStorage {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            Err(CacheError::Storage("quota exceeded".into()))
        }
        fn save(&self, _key: &str, _blob: &str) -> Result<()> {
            Err(CacheError::Storage("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_storage_failures_keep_memory_authoritative() {
        let mut cache = persistent(Arc::new(BrokenStorage), PersistPolicy::WriteThrough);

        cache.set("key1", "value1".to_string());
        assert_eq!(cache.get("key1").as_deref(), Some("value1"));
        assert!(cache.delete("key1"));
    }

    #[test]
    fn test_local_storage_restart() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = persistent(
            Arc::new(LocalStorage::new(dir.path())),
            PersistPolicy::WriteThrough,
        );
        cache.set("doc", "alvara".to_string());
        drop(cache);

        let mut restored = persistent(
            Arc::new(LocalStorage::new(dir.path())),
            PersistPolicy::WriteThrough,
        );
        assert_eq!(restored.get("doc").as_deref(), Some("alvara"));
        // New inserts keep ordering after restored entries
        restored.set("later", "x".to_string());
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_clear_removes_snapshot() {
        let storage = SessionStorage::new();
        let mut cache = persistent(Arc::new(storage.clone()), PersistPolicy::WriteBehind);
        cache.set("key1", "value1".to_string());
        assert!(cache.flush());

        cache.clear();
        assert!(storage.load("persistent-cache").unwrap().is_none());
        assert!(!cache.is_dirty());

        let restored = persistent(Arc::new(storage), PersistPolicy::WriteBehind);
        assert!(restored.is_empty());
    }

    #[test]
    fn test_restored_snapshot_is_trimmed_to_capacity() {
        let storage = SessionStorage::new();
        let sized = |max_size: usize| CacheOptions {
            max_size,
            prefix: "persistent-cache".to_string(),
            ..CacheOptions::default()
        };

        let mut large: CacheManager<String> =
            CacheManager::with_storage(sized(5), Arc::new(storage.clone()));
        for key in ["k0", "k1", "k2", "k3", "k4"] {
            set(&mut large, key);
        }
        drop(large);

        let mut small: CacheManager<String> =
            CacheManager::with_storage(sized(2), Arc::new(storage.clone()));
        assert_eq!(small.len(), 2);
        assert_eq!(small.stats().size, 2);
        assert!(small.has("k3"));
        assert!(small.has("k4"));

        // The trimmed snapshot is written back
        let blob = storage.load("persistent-cache").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);

        set(&mut small, "k5");
        assert_eq!(small.len(), 2);
    }
}
