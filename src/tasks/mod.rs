//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired entries from every cache tier at the
//!   configured interval and flushes deferred snapshots

mod cleanup;

pub use cleanup::spawn_cleanup_task;
