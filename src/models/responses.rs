//! Response DTOs for the HTTP API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheStats, CacheTier, TierStats};
use crate::upload::StoredFile;

/// Response body for `GET /cache/:tier/:key`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub tier: CacheTier,
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    pub fn new(tier: CacheTier, key: impl Into<String>, value: Value) -> Self {
        Self {
            tier,
            key: key.into(),
            value,
        }
    }
}

/// Response body for `PUT /cache/:tier`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub tier: CacheTier,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(tier: CacheTier, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            tier,
            key,
        }
    }
}

/// Response body for `DELETE /cache/:tier/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for `DELETE /cache/:tier`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub tier: CacheTier,
}

impl ClearResponse {
    pub fn new(tier: CacheTier) -> Self {
        Self {
            message: format!("Cache '{}' cleared", tier),
            tier,
        }
    }
}

/// Response body for `GET /cache/stats`, one entry per tier
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub memory: CacheStats,
    pub persistent: CacheStats,
    pub session: CacheStats,
}

impl From<TierStats> for StatsResponse {
    fn from(stats: TierStats) -> Self {
        Self {
            memory: stats.memory,
            persistent: stats.persistent,
            session: stats.session,
        }
    }
}

/// Response body for `POST /cache/cleanup`
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    /// Expired entries removed across all tiers
    pub removed: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for accepted uploads
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub files: Vec<StoredFile>,
}

/// Response body for `DELETE /uploads`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteUploadResponse {
    pub deleted: bool,
    pub path: String,
}

/// Error body for rejected uploads: `{ "error": ..., "errorCode": ... }`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadErrorResponse {
    /// Human-readable reason
    pub error: String,
    /// Stable machine-readable code
    pub error_code: String,
}

impl UploadErrorResponse {
    pub fn new(error: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_code: error_code.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new(CacheTier::Session, "lang", json!("pt-BR"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["tier"], "session");
        assert_eq!(json["value"], "pt-BR");
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new(CacheTier::Memory, "my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_stats_response_uses_camel_case_fields() {
        let stats = TierStats {
            memory: CacheStats::new(100),
            persistent: CacheStats::new(50),
            session: CacheStats::new(75),
        };
        let json = serde_json::to_value(StatsResponse::from(stats)).unwrap();
        assert_eq!(json["persistent"]["maxSize"], 50);
        assert_eq!(json["memory"]["hitRate"], 0.0);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_upload_error_response_serialize() {
        let resp = UploadErrorResponse::new("No files were uploaded", "NO_FILES");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({ "error": "No files were uploaded", "errorCode": "NO_FILES" }));
    }
}
