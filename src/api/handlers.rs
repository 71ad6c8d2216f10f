//! API Handlers
//!
//! HTTP request handlers for the cache tier endpoints and shared state.

use std::io;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::cache::{CacheRegistry, CacheTier};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    CleanupResponse, ClearResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest,
    SetResponse, StatsResponse,
};
use crate::upload::{DocumentCatalog, SecurityPolicy, UploadGate, UploadStore};

/// Application state shared across all handlers.
///
/// Caches are individually locked inside the registry; the upload gate and
/// document catalog are read-only after startup.
#[derive(Clone)]
pub struct AppState {
    /// Memory, persistent and session cache tiers
    pub caches: CacheRegistry,
    /// Upload validation and storage
    pub uploads: Arc<UploadGate>,
    /// Document requirements per service
    pub catalog: Arc<DocumentCatalog>,
}

impl AppState {
    pub fn new(caches: CacheRegistry, uploads: UploadGate, catalog: DocumentCatalog) -> Self {
        Self {
            caches,
            uploads: Arc::new(uploads),
            catalog: Arc::new(catalog),
        }
    }

    /// Builds every component from configuration.
    ///
    /// Fails only if a relative upload root cannot be resolved.
    pub fn from_config(config: &Config) -> io::Result<Self> {
        let caches = CacheRegistry::from_config(config);
        let store = UploadStore::new(&config.upload_root)?;
        let gate = UploadGate::new(SecurityPolicy::from_config(config), store);
        let catalog = config
            .document_config_path
            .as_deref()
            .map(DocumentCatalog::load)
            .unwrap_or_default();

        info!(
            upload_root = %gate.store().root().display(),
            services = catalog.len(),
            "upload gate ready"
        );
        Ok(Self::new(caches, gate, catalog))
    }
}

/// Handler for PUT /cache/:tier
///
/// Stores any JSON value under `key` in the given tier.
pub async fn set_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let tier: CacheTier = tier.parse()?;
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    state
        .caches
        .tier(tier)
        .write()
        .await
        .set(&req.key, req.value);

    Ok(Json(SetResponse::new(tier, req.key)))
}

/// Handler for GET /cache/:tier/:key
///
/// Takes the write lock: a read updates access metadata and stats.
pub async fn get_handler(
    State(state): State<AppState>,
    Path((tier, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    let tier: CacheTier = tier.parse()?;
    let value = state
        .caches
        .tier(tier)
        .write()
        .await
        .get(&key)
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(tier, key, value)))
}

/// Handler for DELETE /cache/:tier/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((tier, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let tier: CacheTier = tier.parse()?;
    if !state.caches.tier(tier).write().await.delete(&key) {
        return Err(CacheError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /cache/:tier
pub async fn clear_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
) -> Result<Json<ClearResponse>> {
    let tier: CacheTier = tier.parse()?;
    state.caches.tier(tier).write().await.clear();

    Ok(Json(ClearResponse::new(tier)))
}

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.caches.all_stats().await.into())
}

/// Handler for POST /cache/cleanup
pub async fn cleanup_handler(State(state): State<AppState>) -> Json<CleanupResponse> {
    let removed = state.caches.cleanup_all().await;
    Json(CleanupResponse { removed })
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_storage_dir: dir.path().join("cache"),
            upload_root: dir.path().join("uploads"),
            ..Config::default()
        };
        (AppState::from_config(&config).unwrap(), dir)
    }

    fn set_request(key: &str, value: serde_json::Value) -> Json<SetRequest> {
        Json(SetRequest {
            key: key.to_string(),
            value,
        })
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let (state, _dir) = test_state();

        let result = set_handler(
            State(state.clone()),
            Path("memory".to_string()),
            set_request("profile", json!({ "name": "Ana" })),
        )
        .await;
        assert!(result.is_ok());

        let response = get_handler(
            State(state),
            Path(("memory".to_string(), "profile".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(response.value, json!({ "name": "Ana" }));
        assert_eq!(response.tier, CacheTier::Memory);
    }

    #[tokio::test]
    async fn test_tiers_are_isolated() {
        let (state, _dir) = test_state();

        set_handler(
            State(state.clone()),
            Path("session".to_string()),
            set_request("k", json!(1)),
        )
        .await
        .unwrap();

        let result = get_handler(State(state), Path(("memory".to_string(), "k".to_string()))).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_tier() {
        let (state, _dir) = test_state();

        let result = set_handler(
            State(state),
            Path("redis".to_string()),
            set_request("k", json!(1)),
        )
        .await;
        assert!(matches!(result, Err(CacheError::UnknownTier(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let (state, _dir) = test_state();
        set_handler(
            State(state.clone()),
            Path("persistent".to_string()),
            set_request("to_delete", json!("v")),
        )
        .await
        .unwrap();

        let path = || Path(("persistent".to_string(), "to_delete".to_string()));
        assert!(delete_handler(State(state.clone()), path()).await.is_ok());
        assert!(matches!(
            delete_handler(State(state.clone()), path()).await,
            Err(CacheError::NotFound(_))
        ));
        assert!(get_handler(State(state), path()).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_and_stats_handlers() {
        let (state, _dir) = test_state();
        for key in ["a", "b"] {
            set_handler(
                State(state.clone()),
                Path("memory".to_string()),
                set_request(key, json!(key)),
            )
            .await
            .unwrap();
        }

        let stats = stats_handler(State(state.clone())).await;
        assert_eq!(stats.memory.size, 2);

        clear_handler(State(state.clone()), Path("memory".to_string()))
            .await
            .unwrap();
        let stats = stats_handler(State(state)).await;
        assert_eq!(stats.memory.size, 0);
    }

    #[tokio::test]
    async fn test_cleanup_handler_with_nothing_expired() {
        let (state, _dir) = test_state();
        let response = cleanup_handler(State(state)).await;
        assert_eq!(response.removed, 0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let (state, _dir) = test_state();

        let result = set_handler(State(state), Path("memory".to_string()), set_request("", json!(1))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }
}
