//! API Routes
//!
//! Configures the Axum router with the cache and upload endpoints.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    cleanup_handler, clear_handler, delete_handler, get_handler, health_handler, set_handler,
    stats_handler, AppState,
};
use super::uploads::{delete_upload_handler, service_upload_handler, upload_handler};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check
/// - `GET /cache/stats` - Statistics of every tier
/// - `POST /cache/cleanup` - Remove expired entries from every tier
/// - `PUT /cache/:tier` - Store a JSON value
/// - `DELETE /cache/:tier` - Clear a tier
/// - `GET /cache/:tier/:key` - Read a value
/// - `DELETE /cache/:tier/:key` - Delete a value
/// - `POST /uploads` - Upload documents
/// - `POST /uploads/:service_id` - Upload documents for a service
/// - `DELETE /uploads` - Delete a stored upload
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
/// - Body limit on upload routes, sized from the upload policy
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.uploads.policy().request_limit();
    let uploads: Router<AppState> = Router::new()
        .route("/uploads", post(upload_handler).delete(delete_upload_handler))
        .route("/uploads/:service_id", post(service_upload_handler))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .route("/health", get(health_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache/cleanup", post(cleanup_handler))
        .route("/cache/:tier", put(set_handler).delete(clear_handler))
        .route("/cache/:tier/:key", get(get_handler).delete(delete_handler))
        .merge(uploads)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
