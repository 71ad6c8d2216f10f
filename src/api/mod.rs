//! API Module
//!
//! HTTP handlers and routing for the cache tiers and document uploads.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /cache/stats`, `POST /cache/cleanup` - Tier maintenance
//! - `PUT|DELETE /cache/:tier`, `GET|DELETE /cache/:tier/:key` - Tier access
//! - `POST /uploads`, `POST /uploads/:service_id`, `DELETE /uploads` - Uploads

pub mod handlers;
pub mod routes;
pub mod uploads;

pub use handlers::*;
pub use routes::create_router;
pub use uploads::{delete_upload_handler, service_upload_handler, upload_handler, USER_ID_HEADER};
