//! Remote destinations.
//!
//! The engine talks to a destination only through [`RemoteStore`]. Locations
//! are strings understood by the store (`remote:path/to/dir` for rclone).

pub mod rclone;

use crate::record::DIRECTORY_MIME;
use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use rclone::RcloneStore;

/// One object in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteEntry {
    pub name: String,

    /// Path relative to the listed location
    pub path: String,

    #[serde(default)]
    pub mime_type: String,

    #[serde(default)]
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn is_directory(&self) -> bool {
        self.is_dir || self.mime_type == DIRECTORY_MIME
    }
}

/// Operations the engine needs from a destination.
///
/// Every method blocks until the underlying transfer finishes.
pub trait RemoteStore: Send + Sync {
    /// Immediate children of `location`. A missing location is reported as
    /// [`SyncError::RemoteNotFound`](crate::utils::SyncError::RemoteNotFound).
    fn list(&self, location: &str) -> Result<Vec<RemoteEntry>>;

    /// Mirror `source` to `dest`, deleting destination files absent locally.
    fn sync(&self, source: &Path, dest: &str, excludes: &[String], use_trash: bool) -> Result<()>;

    /// Upload one local file into the directory `dest`.
    fn copy_file(&self, source: &Path, dest: &str, use_trash: bool) -> Result<()>;

    /// Copy `source` to `dest` without routing data through this machine.
    fn server_side_copy(&self, source: &str, dest: &str, excludes: &[String]) -> Result<()>;

    /// Remove a directory tree (`is_dir`) or a single object.
    fn delete(&self, location: &str, is_dir: bool, use_trash: bool) -> Result<()>;
}
