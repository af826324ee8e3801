//! BTRFS subvolume snapshots.
//!
//! A read-only snapshot is created next to the source subvolume and
//! deleted on release.

use super::SnapshotProvider;
use crate::utils::naming;
use crate::utils::process;
use crate::utils::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info};

#[derive(Debug)]
pub struct BtrfsSnapshot {
    path: PathBuf,
    snapname: String,
    snap_path: Option<PathBuf>,
}

impl BtrfsSnapshot {
    pub fn new(path: &str, snapname: &str) -> Result<Self> {
        let path = PathBuf::from(path);

        if !path.is_absolute() {
            return Err(SyncError::Config(format!(
                "BTRFS subvolume path is not absolute: {}",
                path.display()
            )));
        }
        if path.parent().is_none() {
            return Err(SyncError::Config(
                "cannot snapshot the filesystem root subvolume in place".into(),
            ));
        }

        Ok(Self {
            path,
            snapname: naming::sanitize(snapname),
            snap_path: None,
        })
    }

    /// Location of the live snapshot, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snap_path.as_deref()
    }

    fn parent(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Collision-free path for a new snapshot next to the source.
    fn next_snapshot_path(&self) -> PathBuf {
        let parent = self.parent();
        let name = naming::unique_name(&self.snapname, |candidate| parent.join(candidate).exists());
        parent.join(name)
    }

    fn create(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.snap_path {
            return Ok(path.clone());
        }

        let snap_path = self.next_snapshot_path();

        info!("Creating BTRFS snapshot {}", snap_path.display());
        let created = process::run(
            Command::new("btrfs")
                .args(["subvolume", "snapshot", "-r"])
                .arg(&self.path)
                .arg(&snap_path),
        );
        if let Err(e) = created {
            error!(
                "Error making BTRFS snapshot {} (check permissions): {}",
                snap_path.display(),
                e
            );
            return Err(e);
        }

        self.snap_path = Some(snap_path.clone());
        Ok(snap_path)
    }

    fn delete(&mut self) -> Result<()> {
        let Some(snap_path) = self.snap_path.clone() else {
            return Ok(());
        };

        info!("Deleting BTRFS snapshot {}", snap_path.display());
        if let Err(e) = process::run(
            Command::new("btrfs")
                .args(["subvolume", "delete"])
                .arg(&snap_path),
        ) {
            error!(
                "CRITICAL: could not delete BTRFS snapshot {}: {}",
                snap_path.display(),
                e
            );
            return Err(e);
        }

        self.snap_path = None;
        Ok(())
    }
}

impl SnapshotProvider for BtrfsSnapshot {
    fn acquire(&mut self) -> Result<PathBuf> {
        self.create()
    }

    fn release(&mut self) -> Result<()> {
        self.delete()
    }
}

impl Drop for BtrfsSnapshot {
    fn drop(&mut self) {
        if self.snap_path.is_some() {
            if let Err(e) = self.delete() {
                error!("CRITICAL: BTRFS snapshot left behind: {}", e);
            }
        }
    }
}
