//! Cache Registry Module
//!
//! The three standard cache tiers, built once at startup and shared.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheManager, CacheOptions, CacheStats, SessionStorage, StorageKind};
use crate::config::Config;
use crate::error::CacheError;

/// A cache shared between handlers and background tasks.
pub type SharedCache = Arc<RwLock<CacheManager<Value>>>;

// == Cache Tier ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Process memory only
    Memory,
    /// Mirrored to disk
    Persistent,
    /// Mirrored to process-scoped session storage
    Session,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::Memory, CacheTier::Persistent, CacheTier::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Persistent => "persistent",
            CacheTier::Session => "session",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheTier {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(CacheTier::Memory),
            "persistent" => Ok(CacheTier::Persistent),
            "session" => Ok(CacheTier::Session),
            other => Err(CacheError::UnknownTier(other.to_string())),
        }
    }
}

// == Tier Stats ==
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub memory: CacheStats,
    pub persistent: CacheStats,
    pub session: CacheStats,
}

// == Cache Registry ==
/// Owns the memory, persistent and session caches.
#[derive(Clone)]
pub struct CacheRegistry {
    memory: SharedCache,
    persistent: SharedCache,
    session: SharedCache,
}

impl CacheRegistry {
    pub fn new(
        memory: CacheManager<Value>,
        persistent: CacheManager<Value>,
        session: CacheManager<Value>,
    ) -> Self {
        Self {
            memory: Arc::new(RwLock::new(memory)),
            persistent: Arc::new(RwLock::new(persistent)),
            session: Arc::new(RwLock::new(session)),
        }
    }

    /// Builds the standard tiers from configuration.
    ///
    /// - memory: `app-cache`, not persisted
    /// - persistent: `persistent-cache`, JSON files under `cache_storage_dir`
    /// - session: `session-cache`, process-scoped storage
    pub fn from_config(config: &Config) -> Self {
        let tier_options = |prefix: &str, ttl_ms: u64, max_size: usize| CacheOptions {
            ttl_ms,
            max_size,
            strategy: config.cache_strategy,
            prefix: prefix.to_string(),
            persist: config.cache_persist,
        };

        let session = SessionStorage::new();
        let build = |prefix: &str, ttl_ms: u64, max_size: usize, kind: StorageKind| {
            let options = tier_options(prefix, ttl_ms, max_size);
            match kind.backend(&session, &config.cache_storage_dir) {
                Some(storage) => CacheManager::with_storage(options, storage),
                None => CacheManager::new(options),
            }
        };

        Self::new(
            build(
                "app-cache",
                config.cache_ttl_ms,
                config.cache_max_size,
                StorageKind::Memory,
            ),
            build(
                "persistent-cache",
                config.persistent_ttl_ms,
                config.persistent_max_size,
                StorageKind::Local,
            ),
            build(
                "session-cache",
                config.session_ttl_ms,
                config.session_max_size,
                StorageKind::Session,
            ),
        )
    }

    pub fn tier(&self, tier: CacheTier) -> &SharedCache {
        match tier {
            CacheTier::Memory => &self.memory,
            CacheTier::Persistent => &self.persistent,
            CacheTier::Session => &self.session,
        }
    }

    // == Cleanup All ==
    /// Removes expired entries from every tier. Returns the total removed.
    pub async fn cleanup_all(&self) -> usize {
        let mut removed = 0;
        for tier in CacheTier::ALL {
            let count = self.tier(tier).write().await.cleanup();
            if count > 0 {
                debug!(tier = %tier, removed = count, "expired entries removed");
            }
            removed += count;
        }
        removed
    }

    // == Flush All ==
    /// Writes pending write-behind snapshots. Returns how many tiers wrote.
    pub async fn flush_all(&self) -> usize {
        let mut flushed = 0;
        for tier in CacheTier::ALL {
            if self.tier(tier).write().await.flush() {
                flushed += 1;
            }
        }
        flushed
    }

    // == All Stats ==
    pub async fn all_stats(&self) -> TierStats {
        TierStats {
            memory: self.memory.read().await.stats(),
            persistent: self.persistent.read().await.stats(),
            session: self.session.read().await.stats(),
        }
    }
}
