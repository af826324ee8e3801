//! Backup records: the remote-side identity of one completed backup.
//!
//! A record is named `{target}_{timestamp}` where the timestamp uses the
//! compact ISO-8601 form `%Y%m%dT%H%M%S%z` (e.g. `20220723T101500+0900`).
//! Archive backups append the archive extension after the timestamp.

use crate::utils::{Result, SyncError};
use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Timelike, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// strftime pattern used in backup names.
pub const ISO8601_COMPACT: &str = "%Y%m%dT%H%M%S%z";

/// MIME type rclone reports for directories.
pub const DIRECTORY_MIME: &str = "inode/directory";

/// One stored backup.
///
/// Equality and hashing use `(timestamp, path)` only; ordering is by
/// timestamp, with the path as tie-breaker so the order stays total.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    name: String,
    path: String,
    timestamp: DateTime<FixedOffset>,
    is_dir: bool,
}

impl BackupRecord {
    /// Build a record. Rejects timestamps with a sub-second component.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        timestamp: DateTime<FixedOffset>,
        is_dir: bool,
    ) -> Result<Self> {
        if timestamp.nanosecond() != 0 {
            return Err(SyncError::InvalidRecord(format!(
                "timestamp {} has sub-second resolution",
                timestamp.to_rfc3339()
            )));
        }

        Ok(Self {
            name: name.into(),
            path: path.into(),
            timestamp,
            is_dir,
        })
    }

    /// Reconstruct a record from a remote listing entry.
    ///
    /// Returns `None` when the entry is not a backup of `target`: the name
    /// lacks the `{target}_` prefix or the trailing timestamp does not parse.
    pub fn from_listing(target: &str, name: &str, path: &str, is_dir: bool) -> Option<Self> {
        let rest = name.strip_prefix(target)?.strip_prefix('_')?;
        let stamp = if is_dir {
            rest
        } else {
            rest.split('.').next().unwrap_or(rest)
        };

        let timestamp = parse_timestamp(stamp).ok()?;
        Self::new(name, path, timestamp, is_dir).ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// RFC 3339 rendering for log lines.
    pub fn isoformat(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

impl PartialEq for BackupRecord {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.path == other.path
    }
}

impl Eq for BackupRecord {}

impl Hash for BackupRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Equal instants in different offsets must hash alike.
        self.timestamp.with_timezone(&Utc).hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for BackupRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BackupRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl fmt::Display for BackupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Current time truncated to whole seconds, in the local offset.
pub fn backup_time() -> DateTime<FixedOffset> {
    let now = Utc::now();
    let now = now.with_nanosecond(0).unwrap_or(now);
    now.with_timezone(&Local).fixed_offset()
}

/// Render a timestamp in the compact naming form.
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.format(ISO8601_COMPACT).to_string()
}

/// Parse a compact timestamp. Strings without an offset are rejected.
pub fn parse_timestamp(stamp: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(stamp, ISO8601_COMPACT)
        .map_err(|e| SyncError::InvalidRecord(format!("{stamp}: {e}")))
}
