//! [`RemoteStore`] backed by the `rclone` command.

use super::{RemoteEntry, RemoteStore};
use crate::utils::process;
use crate::utils::{Result, SyncError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

/// rclone's exit code for "directory not found".
const EXIT_DIR_NOT_FOUND: i32 = 3;

#[derive(Debug, Clone)]
pub struct RcloneStore {
    rclone: PathBuf,
    log_level: String,
}

impl RcloneStore {
    /// Locate `rclone` on `$PATH`. `log_level` is passed as `--log-level`.
    pub fn new(log_level: &str) -> Result<Self> {
        Ok(Self {
            rclone: process::require_tool("rclone")?,
            log_level: log_level.to_string(),
        })
    }

    /// Names of the remotes configured in rclone, without the trailing `:`.
    ///
    /// Each call asks rclone again.
    pub fn remotes(&self) -> Result<HashSet<String>> {
        let output = process::run(Command::new(&self.rclone).arg("listremotes"))?;
        Ok(parse_remotes(&output.stdout))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.rclone);
        cmd.args(["--log-level", &self.log_level]);
        cmd
    }
}

fn trash_flag(use_trash: bool) -> String {
    format!("--drive-use-trash={}", use_trash)
}

fn exclude_flags(excludes: &[String]) -> impl Iterator<Item = String> + '_ {
    excludes.iter().map(|p| format!("--exclude={}", p))
}

/// Parse `rclone listremotes` output.
pub fn parse_remotes(stdout: &str) -> HashSet<String> {
    stdout
        .split_whitespace()
        .map(|r| r.trim_end_matches(':').to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

/// Parse `rclone lsjson` output.
pub fn parse_listing(stdout: &str) -> Result<Vec<RemoteEntry>> {
    Ok(serde_json::from_str(stdout)?)
}

/// Check that `location` names one of `remotes` (`remote:path`).
pub fn validate_destination(location: &str, remotes: &HashSet<String>) -> Result<()> {
    match location.split_once(':') {
        Some((remote, _)) if remotes.contains(remote) => Ok(()),
        _ => Err(SyncError::Config(format!(
            "invalid rclone destination {}: no such remote",
            location
        ))),
    }
}

impl RemoteStore for RcloneStore {
    fn list(&self, location: &str) -> Result<Vec<RemoteEntry>> {
        let mut cmd = Command::new(&self.rclone);
        cmd.args(["lsjson", location]);

        match process::run(&mut cmd) {
            Ok(output) => parse_listing(&output.stdout),
            Err(SyncError::ToolFailed { status, .. }) if status.code() == Some(EXIT_DIR_NOT_FOUND) => {
                Err(SyncError::RemoteNotFound(location.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn sync(&self, source: &Path, dest: &str, excludes: &[String], use_trash: bool) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("--links")
            .arg(trash_flag(use_trash))
            .args(exclude_flags(excludes))
            .arg("sync")
            .arg(source)
            .arg(dest);
        process::stream(&mut cmd)
    }

    fn copy_file(&self, source: &Path, dest: &str, use_trash: bool) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg(trash_flag(use_trash)).arg("copy").arg(source).arg(dest);
        process::stream(&mut cmd)
    }

    fn server_side_copy(&self, source: &str, dest: &str, excludes: &[String]) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(exclude_flags(excludes))
            .args(["copy", source, dest]);
        process::stream(&mut cmd)
    }

    fn delete(&self, location: &str, is_dir: bool, use_trash: bool) -> Result<()> {
        let subcommand = if is_dir { "purge" } else { "delete" };
        let mut cmd = self.command();
        cmd.arg(trash_flag(use_trash)).args([subcommand, location]);
        process::stream(&mut cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remotes() {
        let remotes = parse_remotes("gdrive:\nonedrive:\n\n");
        assert_eq!(remotes.len(), 2);
        assert!(remotes.contains("gdrive"));
        assert!(remotes.contains("onedrive"));
    }

    #[test]
    fn test_validate_destination() {
        let remotes = parse_remotes("gdrive:\n");
        assert!(validate_destination("gdrive:backups", &remotes).is_ok());
        assert!(validate_destination("gdrive:", &remotes).is_ok());
        assert!(validate_destination("dropbox:backups", &remotes).is_err());
        assert!(validate_destination("/local/path", &remotes).is_err());
    }

    #[test]
    fn test_parse_listing() {
        let json = r#"[
            {"Path":"home_20220723T101500+0900","Name":"home_20220723T101500+0900","Size":-1,"MimeType":"inode/directory","ModTime":"2022-07-23T10:15:00+09:00","IsDir":true},
            {"Path":"home_20220724T101500+0900.rar","Name":"home_20220724T101500+0900.rar","Size":1024,"MimeType":"application/x-rar","ModTime":"2022-07-24T10:15:00+09:00","IsDir":false}
        ]"#;

        let entries = parse_listing(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_directory());
        assert!(!entries[1].is_directory());
        assert_eq!(entries[1].path, "home_20220724T101500+0900.rar");
    }

    #[test]
    fn test_mime_type_alone_marks_directory() {
        let entries = parse_listing(r#"[{"Path":"x","Name":"x","MimeType":"inode/directory"}]"#).unwrap();
        assert!(entries[0].is_directory());
    }

    #[test]
    fn test_invalid_listing_is_serialization_error() {
        assert!(matches!(parse_listing("not json"), Err(SyncError::Serialization(_))));
    }
}
