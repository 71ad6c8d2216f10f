//! Civic Cache - query caching and secure document uploads
//!
//! Expiring, bounded caches in three tiers, a deduplicating query layer on
//! top of them, and an upload gate that validates citizen documents before
//! they are kept.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod tasks;
pub mod upload;

pub use api::{create_router, AppState};
pub use config::Config;
pub use tasks::spawn_cleanup_task;
