//! Per-target orchestration: back up, list, clean, undo.
//!
//! A [`SyncEngine`] owns one configured target and talks to its destination
//! through a [`RemoteStore`]. The remote listing is cached after the first
//! query and kept in step with uploads and deletions made by this engine.

use crate::archive::{with_archive, Archive, Archiver};
use crate::config::{BackupTarget, DestinationKind, Settings};
use crate::record::{self, BackupRecord};
use crate::remote::{RemoteEntry, RemoteStore};
use crate::retention;
use crate::snapshot::{with_snapshot, Snapshot};
use crate::utils::{Result, SyncError};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Records of `target` found in a remote listing, ascending by time.
///
/// Entries that are not backups of `target` are skipped.
pub fn history_from_listing(target: &str, entries: &[RemoteEntry]) -> Vec<BackupRecord> {
    let mut records: Vec<BackupRecord> = entries
        .iter()
        .filter_map(|e| BackupRecord::from_listing(target, &e.name, &e.path, e.is_directory()))
        .collect();
    records.sort();
    records
}

pub struct SyncEngine {
    target: BackupTarget,
    settings: Arc<Settings>,
    remote: Arc<dyn RemoteStore>,

    /// Cached remote history, `None` until first listed
    backups: Option<Vec<BackupRecord>>,

    /// Backup whose upload has started but not completed
    in_flight: Option<BackupRecord>,
}

impl SyncEngine {
    /// Create an engine for `target`.
    ///
    /// The source is checked up front (path exists, dataset name is sane)
    /// so a bad target fails before anything is uploaded.
    pub fn new(
        target: BackupTarget,
        settings: Arc<Settings>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        target.validate()?;
        Snapshot::new(&target.source, "validate", &settings)?;

        Ok(Self {
            target,
            settings,
            remote,
            backups: None,
            in_flight: None,
        })
    }

    pub fn target(&self) -> &BackupTarget {
        &self.target
    }

    pub fn in_flight(&self) -> Option<&BackupRecord> {
        self.in_flight.as_ref()
    }

    fn root(&self) -> &str {
        &self.target.destination.path
    }

    fn location(&self, path: &str) -> String {
        format!("{}/{}", self.root(), path)
    }

    /// Backups of this target at the destination, ascending by time.
    ///
    /// The first call (or any call with `force`) lists the remote. A failed
    /// listing is logged and reported as an empty history without being
    /// cached, so the next call tries again.
    pub fn get_backups(&mut self, force: bool) -> &[BackupRecord] {
        if force || self.backups.is_none() {
            info!("Querying previous backups of {} at {}", self.target.name, self.root());
            match self.remote.list(self.root()) {
                Ok(entries) => {
                    self.backups = Some(history_from_listing(&self.target.name, &entries));
                }
                Err(e) => {
                    warn!("Could not list {}: {}", self.root(), e);
                    return &[];
                }
            }
        }

        self.backups.as_deref().unwrap_or(&[])
    }

    fn remember(&mut self, record: &BackupRecord) {
        if let Some(backups) = self.backups.as_mut() {
            backups.push(record.clone());
            backups.sort();
        }
    }

    fn forget(&mut self, record: &BackupRecord) {
        if let Some(backups) = self.backups.as_mut() {
            backups.retain(|b| b != record);
        }
    }

    /// Take a new backup and upload it.
    ///
    /// The record is marked in flight from the moment the upload starts
    /// until it completes, so [`undo`](Self::undo) can remove a partial
    /// upload after a failure or interrupt.
    pub fn backup(&mut self) -> Result<BackupRecord> {
        let time = record::backup_time();
        let stamp = record::format_timestamp(&time);

        if self.target.destination.kind != DestinationKind::Rclone {
            return Err(SyncError::Unsupported(format!(
                "{:?} destinations are not supported",
                self.target.destination.kind
            )));
        }

        info!("Starting backup of {}", self.target.name);
        let record = if self.target.destination.archive.enable {
            self.backup_archive(time, &stamp)?
        } else {
            self.backup_directory(time, &stamp)?
        };

        self.remember(&record);
        self.in_flight = None;
        info!("Finished backup of {} captured at {}", self.target.name, record.isoformat());
        Ok(record)
    }

    fn backup_directory(&mut self, time: DateTime<FixedOffset>, stamp: &str) -> Result<BackupRecord> {
        let name = format!("{}_{}", self.target.name, stamp);
        let record = BackupRecord::new(name.clone(), name, time, true)?;
        let mut snapshot = Snapshot::new(&self.target.source, &format!("temp_{}", stamp), &self.settings)?;

        with_snapshot(&mut snapshot, |snap_path| {
            self.in_flight = Some(record.clone());

            if self.target.destination.rclone.server_side_copy {
                self.preseed(&record)?;
            }

            info!("Uploading backup captured at {}", record.isoformat());
            self.remote.sync(
                snap_path,
                &self.location(record.path()),
                &self.settings.excludes,
                self.target.destination.rclone.use_trash,
            )?;
            Ok(record)
        })
    }

    /// Copy the latest directory backup into `new` on the remote side so
    /// the following sync only transfers differences.
    fn preseed(&mut self, new: &BackupRecord) -> Result<()> {
        let latest = self
            .get_backups(false)
            .iter()
            .rev()
            .find(|b| b.is_dir() && *b != new)
            .cloned();

        let Some(latest) = latest else {
            return Ok(());
        };

        info!("Copying backup captured at {} on the remote side", latest.isoformat());
        self.remote.server_side_copy(
            &self.location(latest.path()),
            &self.location(new.path()),
            &self.settings.excludes,
        )
    }

    fn backup_archive(&mut self, time: DateTime<FixedOffset>, stamp: &str) -> Result<BackupRecord> {
        // Missing archive tools should fail before a snapshot is taken.
        let archiver = Archiver::new(self.target.destination.archive.format, &self.settings)?;
        let mut snapshot = Snapshot::new(&self.target.source, &format!("temp_{}", stamp), &self.settings)?;
        let archive_name = format!("{}_{}", self.target.name, stamp);
        let working_paths = self.settings.archive_working_paths.clone();

        with_snapshot(&mut snapshot, |snap_path| {
            let mut archive = Archive::new(snap_path, &archive_name, archiver, &working_paths)?;
            let file_name = archive.file_name();
            let record = BackupRecord::new(file_name.clone(), file_name, time, false)?;

            with_archive(&mut archive, |archive_path| {
                self.in_flight = Some(record.clone());
                info!("Uploading backup captured at {}", record.isoformat());
                self.remote.copy_file(
                    archive_path,
                    self.root(),
                    self.target.destination.rclone.use_trash,
                )?;
                Ok(record)
            })
        })
    }

    /// Remove the in-flight backup from the remote, if it got there.
    ///
    /// No-op when nothing is in flight. The in-flight marker is cleared
    /// whether or not the remote had the backup; it survives only a failed
    /// deletion.
    pub fn undo(&mut self) -> Result<()> {
        let Some(pending) = self.in_flight.clone() else {
            return Ok(());
        };

        info!("Looking for interrupted backup {} at {}", pending, self.root());
        let present = self.get_backups(true).contains(&pending);

        if present {
            info!("Removing interrupted backup {}", pending);
            self.remote
                .delete(&self.location(pending.path()), pending.is_dir(), false)?;
            self.forget(&pending);
        } else {
            info!("Interrupted backup {} never reached the remote", pending);
        }

        self.in_flight = None;
        Ok(())
    }

    /// Delete backups the retention policy does not keep.
    ///
    /// Returns the deleted records, ascending by time.
    pub fn clean(&mut self) -> Result<Vec<BackupRecord>> {
        self.clean_at(Utc::now())
    }

    fn clean_at(&mut self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        info!("Starting cleanup of {}", self.target.name);
        let backups = self.get_backups(false).to_vec();
        let discard = retention::select_discard(&backups, &self.target.destination.retention, now);
        let use_trash = self.target.destination.rclone.use_trash;

        for backup in &discard {
            info!("Deleting backup captured at {}", backup.isoformat());
            self.remote
                .delete(&self.location(backup.path()), backup.is_dir(), use_trash)?;
            self.forget(backup);
        }

        info!("Finished cleanup of {}: {} removed", self.target.name, discard.len());
        Ok(discard)
    }
}
