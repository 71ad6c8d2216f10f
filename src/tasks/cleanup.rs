//! TTL Cleanup Task
//!
//! Background task that periodically removes expired entries from every
//! cache tier and writes pending write-behind snapshots.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheRegistry;

/// Spawns a background task that periodically cleans up expired cache entries.
///
/// Each run sweeps the memory, persistent and session tiers, then flushes
/// tiers that defer their snapshots.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cleanup_handle = spawn_cleanup_task(state.caches.clone(), 60);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(caches: CacheRegistry, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting TTL cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = caches.cleanup_all().await;
            let flushed = caches.flush_all().await;

            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
            if flushed > 0 {
                debug!(tiers = flushed, "pending snapshots written");
            }
        }
    })
}
