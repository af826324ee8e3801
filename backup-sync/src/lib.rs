//! backup-sync library
//!
//! Snapshot a source (directory, ZFS dataset, BTRFS subvolume), optionally
//! archive it, upload it to an rclone remote as a timestamped backup, and
//! prune old backups with a tiered retention policy.

pub mod archive;
pub mod config;
pub mod engine;
pub mod fs;
pub mod interrupt;
pub mod record;
pub mod remote;
pub mod retention;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::SyncEngine;
pub use utils::errors::{Result, SyncError};
