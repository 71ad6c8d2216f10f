//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::{EvictionStrategy, PersistPolicy};

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// TTL of the in-memory tier, in milliseconds
    pub cache_ttl_ms: u64,
    /// Capacity of the in-memory tier
    pub cache_max_size: usize,
    /// Eviction strategy shared by all tiers
    pub cache_strategy: EvictionStrategy,
    /// When persistent tiers write to storage
    pub cache_persist: PersistPolicy,
    /// TTL of the persistent (disk-backed) tier, in milliseconds
    pub persistent_ttl_ms: u64,
    /// Capacity of the persistent tier
    pub persistent_max_size: usize,
    /// TTL of the session tier, in milliseconds
    pub session_ttl_ms: u64,
    /// Capacity of the session tier
    pub session_max_size: usize,
    /// Directory holding persisted cache blobs
    pub cache_storage_dir: PathBuf,
    /// Root directory for uploaded files
    pub upload_root: PathBuf,
    /// Maximum size of a single uploaded file, in bytes
    pub upload_max_file_size: u64,
    /// Maximum number of files per upload request
    pub upload_max_files: usize,
    /// Maximum size of a non-file multipart field, in bytes
    pub upload_field_size: u64,
    /// Optional JSON file mapping service ids to required documents
    pub document_config_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 60)
    /// - `CACHE_TTL_MS` / `CACHE_MAX_SIZE` - memory tier (default: 5 min / 100)
    /// - `CACHE_STRATEGY` - `lru`, `lfu` or `fifo` (default: lru)
    /// - `CACHE_PERSIST_MODE` - `write-through` or `write-behind` (default: write-through)
    /// - `PERSISTENT_CACHE_TTL_MS` / `PERSISTENT_CACHE_MAX_SIZE` (default: 30 min / 50)
    /// - `SESSION_CACHE_TTL_MS` / `SESSION_CACHE_MAX_SIZE` (default: 15 min / 75)
    /// - `CACHE_STORAGE_DIR` - persisted cache directory (default: .cache)
    /// - `UPLOAD_ROOT` - upload root directory (default: uploads)
    /// - `UPLOAD_MAX_FILE_SIZE` - bytes per file (default: 50 MiB)
    /// - `UPLOAD_MAX_FILES` - files per request (default: 20)
    /// - `UPLOAD_FIELD_SIZE` - bytes per text field (default: 10 MiB)
    /// - `DOCUMENT_CONFIG_PATH` - service document requirements (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_env("SERVER_PORT").unwrap_or(defaults.server_port),
            cleanup_interval: parse_env("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            cache_ttl_ms: parse_env("CACHE_TTL_MS").unwrap_or(defaults.cache_ttl_ms),
            cache_max_size: parse_env("CACHE_MAX_SIZE").unwrap_or(defaults.cache_max_size),
            cache_strategy: parse_env("CACHE_STRATEGY").unwrap_or(defaults.cache_strategy),
            cache_persist: parse_env("CACHE_PERSIST_MODE").unwrap_or(defaults.cache_persist),
            persistent_ttl_ms: parse_env("PERSISTENT_CACHE_TTL_MS")
                .unwrap_or(defaults.persistent_ttl_ms),
            persistent_max_size: parse_env("PERSISTENT_CACHE_MAX_SIZE")
                .unwrap_or(defaults.persistent_max_size),
            session_ttl_ms: parse_env("SESSION_CACHE_TTL_MS").unwrap_or(defaults.session_ttl_ms),
            session_max_size: parse_env("SESSION_CACHE_MAX_SIZE")
                .unwrap_or(defaults.session_max_size),
            cache_storage_dir: parse_env("CACHE_STORAGE_DIR").unwrap_or(defaults.cache_storage_dir),
            upload_root: parse_env("UPLOAD_ROOT").unwrap_or(defaults.upload_root),
            upload_max_file_size: parse_env("UPLOAD_MAX_FILE_SIZE")
                .unwrap_or(defaults.upload_max_file_size),
            upload_max_files: parse_env("UPLOAD_MAX_FILES").unwrap_or(defaults.upload_max_files),
            upload_field_size: parse_env("UPLOAD_FIELD_SIZE").unwrap_or(defaults.upload_field_size),
            document_config_path: parse_env("DOCUMENT_CONFIG_PATH"),
        }
    }
}

/// Reads and parses an environment variable, ignoring unset or malformed values.
fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cleanup_interval: 60,
            cache_ttl_ms: 5 * 60 * 1000,
            cache_max_size: 100,
            cache_strategy: EvictionStrategy::Lru,
            cache_persist: PersistPolicy::WriteThrough,
            persistent_ttl_ms: 30 * 60 * 1000,
            persistent_max_size: 50,
            session_ttl_ms: 15 * 60 * 1000,
            session_max_size: 75,
            cache_storage_dir: PathBuf::from(".cache"),
            upload_root: PathBuf::from("uploads"),
            upload_max_file_size: 50 * 1024 * 1024,
            upload_max_files: 20,
            upload_field_size: 10 * 1024 * 1024,
            document_config_path: None,
        }
    }
}
