//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with access tracking.

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// A cached value plus the metadata eviction strategies rank by.
///
/// Serialized in camelCase so persisted blobs keep the
/// `{ data, timestamp, accessCount, lastAccessed }` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// The stored value
    pub data: T,
    /// Insertion timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Number of successful reads since insertion
    pub access_count: u64,
    /// Last read (or insertion) timestamp (Unix milliseconds)
    pub last_accessed: u64,
    /// Insertion order, breaks ties between equal timestamps or counts
    #[serde(default)]
    pub seq: u64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a fresh entry inserted at `now`.
    pub fn new(data: T, now: u64, seq: u64) -> Self {
        Self {
            data,
            timestamp: now,
            access_count: 0,
            last_accessed: now,
            seq,
        }
    }

    // == Is Expired ==
    /// An entry expires once strictly more than `ttl_ms` has elapsed since
    /// insertion. Reads do not extend its life.
    pub fn is_expired(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.timestamp) > ttl_ms
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("value".to_string(), 1_000, 7);

        assert_eq!(entry.data, "value");
        assert_eq!(entry.timestamp, 1_000);
        assert_eq!(entry.last_accessed, 1_000);
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.seq, 7);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new(1u32, 1_000, 0);

        // Exactly ttl elapsed is still fresh
        assert!(!entry.is_expired(1_500, 500));
        assert!(entry.is_expired(1_501, 500));
    }

    #[test]
    fn test_clock_skew_does_not_expire() {
        let entry = CacheEntry::new(1u32, 10_000, 0);
        assert!(!entry.is_expired(5_000, 100));
    }

    #[test]
    fn test_touch_updates_access_metadata() {
        let mut entry = CacheEntry::new(1u32, 1_000, 0);
        entry.touch(1_200);
        entry.touch(1_300);

        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_accessed, 1_300);
        assert_eq!(entry.timestamp, 1_000);
    }

    #[test]
    fn test_serialized_field_names() {
        let entry = CacheEntry::new("v".to_string(), 1, 0);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["data"], "v");
        assert!(json.get("accessCount").is_some());
        assert!(json.get("lastAccessed").is_some());
    }

    #[test]
    fn test_deserialize_without_seq() {
        let json = r#"{"data":5,"timestamp":10,"accessCount":2,"lastAccessed":12}"#;
        let entry: CacheEntry<u32> = serde_json::from_str(json).unwrap();
        assert_eq!(entry.seq, 0);
        assert_eq!(entry.access_count, 2);
    }
}
