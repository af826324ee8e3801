//! ZFS dataset snapshots.
//!
//! `acquire` takes a recursive snapshot of the dataset. When the dataset is
//! mounted, the snapshot is read through `{mountpoint}/.zfs/snapshot/{name}`.
//! Otherwise it is mounted read-only under the configured mount root, which
//! needs root privileges.

use super::SnapshotProvider;
use crate::utils::naming;
use crate::utils::process;
use crate::utils::{Result, SyncError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info};

/// Dataset and snapshot names mapped to their mountpoints.
pub type DatasetMap = HashMap<String, Option<PathBuf>>;

#[derive(Debug)]
pub struct ZfsSnapshot {
    dataset: String,
    snapname: String,
    mount_root: PathBuf,
    datasets: Option<DatasetMap>,
    snapshot: Option<String>,
    mount_path: Option<PathBuf>,
    manual_mount: bool,
}

impl ZfsSnapshot {
    pub fn new(dataset: &str, snapname: &str, mount_root: &Path) -> Result<Self> {
        if dataset.contains('@') || dataset.starts_with('/') {
            return Err(SyncError::Config(format!(
                "expected a ZFS dataset name, got snapshot or path: {}",
                dataset
            )));
        }

        Ok(Self {
            dataset: dataset.to_string(),
            snapname: naming::sanitize(snapname),
            mount_root: mount_root.to_path_buf(),
            datasets: None,
            snapshot: None,
            mount_path: None,
            manual_mount: false,
        })
    }

    /// Full name (`dataset@snap`) of the live snapshot, if any.
    pub fn snapshot_name(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    /// All filesystems and snapshots with their mountpoints.
    ///
    /// The listing is cached; pass `refresh` to query `zfs` again.
    pub fn list_datasets(&mut self, refresh: bool) -> Result<&DatasetMap> {
        if refresh || self.datasets.is_none() {
            let output = process::run(Command::new("zfs").args([
                "list",
                "-H",
                "-o",
                "name,mountpoint",
                "-t",
                "filesystem,snapshot",
            ]))?;
            self.datasets = Some(parse_dataset_listing(&output.stdout));
        }

        Ok(&*self.datasets.get_or_insert_with(HashMap::new))
    }

    fn create(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.mount_path {
            return Ok(path.clone());
        }

        let dataset = self.dataset.clone();
        let base = self.snapname.clone();
        let datasets = self.list_datasets(false)?;
        let mountpoint = match datasets.get(&dataset) {
            Some(mountpoint) => mountpoint.clone(),
            None => {
                return Err(SyncError::Config(format!(
                    "ZFS dataset {} does not exist",
                    dataset
                )))
            }
        };
        let snapname = naming::unique_name(&base, |candidate| {
            datasets.contains_key(&format!("{}@{}", dataset, candidate))
        });
        let fullname = format!("{}@{}", dataset, snapname);

        info!("Creating ZFS snapshot {}", fullname);
        if let Err(e) = process::run(Command::new("zfs").args(["snapshot", "-r", &fullname])) {
            error!(
                "Error making snapshot {} (try `zfs allow` to delegate snapshot permission): {}",
                fullname, e
            );
            return Err(e);
        }

        self.snapshot = Some(fullname.clone());
        if let Some(datasets) = self.datasets.as_mut() {
            datasets.insert(fullname.clone(), None);
        }

        let path = match mountpoint {
            Some(mountpoint) => snapshot_dir(&mountpoint, &snapname),
            None => self.mount(&fullname)?,
        };
        self.mount_path = Some(path.clone());
        Ok(path)
    }

    fn mount(&mut self, fullname: &str) -> Result<PathBuf> {
        if !nix::unistd::geteuid().is_root() {
            let msg = format!("root privilege is required to mount snapshot {}", fullname);
            error!("{}", msg);
            return Err(SyncError::PermissionDenied(msg));
        }

        // Sanitizing would drop a leading dot, so it is added afterwards.
        let dirname = naming::unique_name(&format!("tmp_{}", fullname), |candidate| {
            self.mount_root.join(format!(".{}", candidate)).exists()
        });
        let dir = self.mount_root.join(format!(".{}", dirname));
        std::fs::create_dir_all(&dir)?;

        info!("Mounting ZFS snapshot {} at {}", fullname, dir.display());
        let mounted = process::run(
            Command::new("mount")
                .args(["-t", "zfs", "-o", "ro", fullname])
                .arg(&dir),
        );
        if let Err(e) = mounted {
            error!("Error mounting snapshot {} at {}: {}", fullname, dir.display(), e);
            let _ = std::fs::remove_dir(&dir);
            return Err(e);
        }

        self.manual_mount = true;
        Ok(dir)
    }

    fn unmount(&mut self) -> Result<()> {
        let Some(path) = self.mount_path.clone() else {
            return Ok(());
        };
        if !self.manual_mount {
            return Ok(());
        }

        info!("Unmounting ZFS snapshot at {}", path.display());
        if let Err(e) = process::run(Command::new("umount").arg(&path)) {
            error!("CRITICAL: could not unmount ZFS snapshot at {}: {}", path.display(), e);
            return Err(e);
        }
        self.finish_unmount(&path)
    }

    /// Forget the manual mount at `path`, then remove its directory.
    ///
    /// The mount state is cleared before the removal so a leftover
    /// directory never makes a later release run `umount` again.
    fn finish_unmount(&mut self, path: &Path) -> Result<()> {
        self.mount_path = None;
        self.manual_mount = false;

        if let Err(e) = std::fs::remove_dir(path) {
            error!("CRITICAL: could not remove mount directory {}: {}", path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.unmount()?;
        self.mount_path = None;

        let Some(fullname) = self.snapshot.clone() else {
            return Ok(());
        };
        if !fullname.contains('@') {
            return Err(SyncError::Config(format!(
                "refusing to destroy non-snapshot dataset {}",
                fullname
            )));
        }

        info!("Destroying ZFS snapshot {}", fullname);
        if let Err(e) = process::run(Command::new("zfs").args(["destroy", "-R", &fullname])) {
            error!(
                "CRITICAL: could not destroy ZFS snapshot {} (try `zfs allow` to delegate destroy permission): {}",
                fullname, e
            );
            return Err(e);
        }

        if let Some(datasets) = self.datasets.as_mut() {
            datasets.remove(&fullname);
        }
        self.snapshot = None;
        Ok(())
    }
}

impl SnapshotProvider for ZfsSnapshot {
    fn acquire(&mut self) -> Result<PathBuf> {
        self.create()
    }

    fn release(&mut self) -> Result<()> {
        self.destroy()
    }
}

impl Drop for ZfsSnapshot {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            if let Err(e) = self.destroy() {
                error!("CRITICAL: ZFS snapshot left behind: {}", e);
            }
        }
    }
}

/// Browsable directory of snapshot `snapname` under a mounted dataset.
pub fn snapshot_dir(mountpoint: &Path, snapname: &str) -> PathBuf {
    mountpoint.join(".zfs").join("snapshot").join(snapname)
}

/// Parse `zfs list -H -o name,mountpoint` output.
///
/// Mountpoints that are not absolute paths (`-`, `none`, `legacy`) map to `None`.
pub fn parse_dataset_listing(stdout: &str) -> DatasetMap {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let name = cols.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let mountpoint = cols
                .next()
                .map(str::trim)
                .filter(|m| m.starts_with('/'))
                .map(PathBuf::from);
            Some((name.to_string(), mountpoint))
        })
        .collect()
}
