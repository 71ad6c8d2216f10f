//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use serde::{Deserialize, Serialize};

// == Cache Stats ==
/// Tracks cache performance metrics.
///
/// `hit_rate` is recomputed on every recorded access so a persisted
/// snapshot is always self-consistent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Current number of entries in the cache
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
    /// hits / (hits + misses), 0 when nothing was requested
    pub hit_rate: f64,
    /// Number of entries evicted by the strategy
    #[serde(default)]
    pub evictions: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    // == Record Hit ==
    pub fn record_hit(&mut self) {
        self.hits += 1;
        self.update_hit_rate();
    }

    // == Record Miss ==
    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.update_hit_rate();
    }

    // == Record Eviction ==
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Update Entry Count ==
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Zeroes all counters, keeping the capacity.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_size);
    }

    fn update_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        };
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new(100);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
        assert_eq!(stats.max_size, 100);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_hit_rate_all_hits() {
        let mut stats = CacheStats::new(10);
        stats.record_hit();
        stats.record_hit();
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new(10);
        stats.record_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_hit();
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut stats = CacheStats::new(42);
        stats.record_hit();
        stats.record_eviction();
        stats.set_size(3);

        stats.reset();
        assert_eq!(stats, CacheStats::new(42));
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(CacheStats::new(5)).unwrap();
        assert_eq!(json["maxSize"], 5);
        assert!(json.get("hitRate").is_some());
    }
}
