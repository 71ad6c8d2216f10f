//! Eviction Strategy Module
//!
//! Chooses which entry leaves a full cache.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

// == Eviction Strategy ==
/// Rule for picking the victim when a bounded cache overflows.
///
/// Ties are broken by insertion order: the earliest inserted entry loses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently used: oldest `last_accessed`
    #[default]
    Lru,
    /// Least frequently used: lowest `access_count`
    Lfu,
    /// First in, first out: oldest `timestamp`
    Fifo,
}

impl EvictionStrategy {
    // == Select Victim ==
    /// Returns the key that should be evicted, or None for an empty cache.
    pub fn select_victim<'a, T: 'a>(
        &self,
        entries: impl Iterator<Item = (&'a String, &'a CacheEntry<T>)>,
    ) -> Option<String> {
        let rank = |entry: &CacheEntry<T>| -> (u64, u64) {
            match self {
                EvictionStrategy::Lru => (entry.last_accessed, entry.seq),
                EvictionStrategy::Lfu => (entry.access_count, entry.seq),
                EvictionStrategy::Fifo => (entry.timestamp, entry.seq),
            }
        };

        entries
            .min_by_key(|(_, entry)| rank(*entry))
            .map(|(key, _)| key.clone())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Lfu => "lfu",
            EvictionStrategy::Fifo => "fifo",
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionStrategy::Lru),
            "lfu" => Ok(EvictionStrategy::Lfu),
            "fifo" => Ok(EvictionStrategy::Fifo),
            other => Err(format!("unknown eviction strategy: {}", other)),
        }
    }
}
