//! Cache Module
//!
//! Provides expiring, bounded caches with LRU/LFU/FIFO eviction and
//! optional persistence.

mod clock;
mod entry;
mod eviction;
mod registry;
mod stats;
mod storage;
mod store;


// Re-export public types
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use eviction::EvictionStrategy;
pub use registry::{CacheRegistry, CacheTier, SharedCache, TierStats};
pub use stats::CacheStats;
pub use storage::{
    CacheStorage, LocalStorage, PersistPolicy, PersistedCache, SessionStorage, StorageKind,
};
pub use store::{CacheManager, CacheOptions};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
