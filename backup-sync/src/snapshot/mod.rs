//! Point-in-time views of a backup source.
//!
//! A [`Snapshot`] is built once from the target's source configuration and
//! then driven through `acquire` / `release`. Use [`with_snapshot`] so the
//! release happens on every exit path.

pub mod btrfs;
pub mod directory;
pub mod zfs;

use crate::config::{Settings, SourceConfig, SourceKind};
use crate::utils::scope::guarded;
use crate::utils::Result;
use std::path::{Path, PathBuf};

pub use btrfs::BtrfsSnapshot;
pub use directory::DirectorySnapshot;
pub use zfs::ZfsSnapshot;

/// Lifecycle shared by all snapshot backends.
pub trait SnapshotProvider {
    /// Return an absolute directory showing the source as of this call.
    /// Calling again while acquired returns the same path.
    fn acquire(&mut self) -> Result<PathBuf>;

    /// Undo every side effect of `acquire`. Safe to call repeatedly and
    /// after a partial `acquire`.
    fn release(&mut self) -> Result<()>;
}

/// Snapshot backend selected from configuration.
#[derive(Debug)]
pub enum Snapshot {
    Directory(DirectorySnapshot),
    Zfs(ZfsSnapshot),
    Btrfs(BtrfsSnapshot),
}

impl Snapshot {
    /// Build the backend for `source`. `snapname` is sanitized by the backend.
    pub fn new(source: &SourceConfig, snapname: &str, settings: &Settings) -> Result<Self> {
        Ok(match source.kind {
            SourceKind::Directory => Snapshot::Directory(DirectorySnapshot::new(&source.path)?),
            SourceKind::Zfs => Snapshot::Zfs(ZfsSnapshot::new(
                &source.path,
                snapname,
                &settings.zfs_mount_root,
            )?),
            SourceKind::Btrfs => Snapshot::Btrfs(BtrfsSnapshot::new(&source.path, snapname)?),
        })
    }
}

impl SnapshotProvider for Snapshot {
    fn acquire(&mut self) -> Result<PathBuf> {
        match self {
            Snapshot::Directory(s) => s.acquire(),
            Snapshot::Zfs(s) => s.acquire(),
            Snapshot::Btrfs(s) => s.acquire(),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self {
            Snapshot::Directory(s) => s.release(),
            Snapshot::Zfs(s) => s.release(),
            Snapshot::Btrfs(s) => s.release(),
        }
    }
}

/// Acquire `snapshot`, run `body` on the snapshot path, release.
pub fn with_snapshot<S, F, T>(snapshot: &mut S, body: F) -> Result<T>
where
    S: SnapshotProvider,
    F: FnOnce(&Path) -> Result<T>,
{
    guarded(snapshot, "snapshot", |s| s.acquire(), |s| s.release(), body)
}
