//! Configuration management for backup-sync.
//!
//! Loads a TOML file with program-wide `[settings]` and one `[[backups]]`
//! table per backup target.

use crate::retention::RetentionPolicy;
use crate::utils::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub backups: Vec<BackupTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Level passed to rclone's `--log-level` (DEBUG, INFO, NOTICE, ERROR)
    #[serde(default = "default_rclone_log_level")]
    pub rclone_log_level: String,

    /// rclone filter patterns excluded from directory backups
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Candidate roots for archive scratch space, tried in order
    #[serde(default = "default_archive_working_paths")]
    pub archive_working_paths: Vec<PathBuf>,

    /// Where ZFS snapshots without a mountpoint get mounted
    #[serde(default = "default_zfs_mount_root")]
    pub zfs_mount_root: PathBuf,

    #[serde(default)]
    pub tar: TarSettings,

    #[serde(default)]
    pub sevenz: SevenzSettings,

    #[serde(default)]
    pub rar: RarSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarSettings {
    /// Compressor command given to `tar -I`; empty writes a plain tarball
    #[serde(default = "default_tar_compressor")]
    pub compressor: Option<String>,

    #[serde(default = "default_tar_args")]
    pub args: Vec<String>,

    /// Extension appended to the archive name, including the leading dot
    #[serde(default = "default_tar_extension")]
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SevenzSettings {
    /// Explicit executable; otherwise `7zz` then `7z` from `$PATH`
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_sevenz_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RarSettings {
    /// Explicit executable; otherwise `rar` from `$PATH`
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_rar_args")]
    pub args: Vec<String>,
}

/// One configured backup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTarget {
    /// Prefix of every backup name at the destination
    pub name: String,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Directory,
    Zfs,
    Btrfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,

    /// Absolute path for directory/btrfs sources, dataset name for zfs
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Directory,
    Rclone,
    Zfs,
    Btrfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub kind: DestinationKind,

    /// Remote root, e.g. `gdrive:backups`
    pub path: String,

    #[serde(default)]
    pub archive: ArchiveSettings,

    #[serde(default)]
    pub rclone: RcloneOptions,

    #[serde(default)]
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "tar")]
    Tar,
    #[serde(rename = "7z")]
    SevenZ,
    #[serde(rename = "rar")]
    Rar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    #[serde(default)]
    pub enable: bool,

    #[serde(default = "default_archive_format")]
    pub format: ArchiveFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RcloneOptions {
    /// Pre-seed a new directory backup from the latest one at the remote
    #[serde(default)]
    pub server_side_copy: bool,

    /// Move deleted files to the remote's trash instead of removing them
    #[serde(default)]
    pub use_trash: bool,
}

/// Extensions rar stores without compression.
const DO_NOT_COMPRESS: &[&str] = &[
    // images
    ".jpg", ".jpeg", ".png", ".avif", ".heif", ".heic", ".webp", ".jxr", ".j2k",
    // videos
    ".mp4", ".mov", ".webm", ".mkv", ".wmv", ".avi", ".rm",
    // archives
    ".rar", ".7z", ".zipx", ".zst", ".zstd", ".lha", ".lzh", ".bz2", ".lzma", ".gz", ".tgz",
    ".bzip2", ".tbz", ".tbz2", ".xz", ".txz", ".cab", ".arj", ".cbz", ".cbr", ".cb7",
    // audio
    ".m4a", ".mka", ".opus", ".ogg", ".mp3", ".aac", ".flac", ".ape", ".tak", ".tta", ".wma",
];

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_rclone_log_level() -> String {
    "INFO".to_string()
}

fn default_excludes() -> Vec<String> {
    [
        "__pycache__/**",
        ".Trash-1000/**",
        ".thumbnails/**",
        ".git/**",
        ".ropeproject/**",
        ".svn",
        ".DS_Store",
        ".directory",
        "Thumbs.db",
        "fish_variables",
        ".zsh_history",
        "*.zcompdump",
        "*.lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_archive_working_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/tmp")];
    let cache_home = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")));
    if let Some(cache) = cache_home {
        paths.push(cache);
    }
    paths
}

fn default_zfs_mount_root() -> PathBuf {
    PathBuf::from("/run/media")
}

fn default_tar_compressor() -> Option<String> {
    Some("zstd -19 --threads=0".to_string())
}

fn default_tar_args() -> Vec<String> {
    vec![
        "--format=gnu".to_string(),
        "--preserve-permissions".to_string(),
        "--xattrs".to_string(),
    ]
}

fn default_tar_extension() -> String {
    ".tar.zst".to_string()
}

fn default_sevenz_args() -> Vec<String> {
    [
        "-bd",         // no progress indicator
        "-scrcSHA256",
        "-m0=lzma2",
        "-mx7",
        "-mfb=64",
        "-md=32m",
        "-snl",        // store symlinks as links
        "-ssp",        // keep source atime
        "-ms=on",      // solid
        "-t7z",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_rar_args() -> Vec<String> {
    let mut args: Vec<String> = [
        "-s",    // solid
        "-rr1",  // recovery record
        "-htb",  // BLAKE2sp checksums
        "-m5",
        "-ma5",  // RAR 5.0 format
        "-idc",
        "-r",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("-ms{}", DO_NOT_COMPRESS.join(";")));
    args
}

fn default_archive_format() -> ArchiveFormat {
    ArchiveFormat::Rar
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            rclone_log_level: default_rclone_log_level(),
            excludes: default_excludes(),
            archive_working_paths: default_archive_working_paths(),
            zfs_mount_root: default_zfs_mount_root(),
            tar: TarSettings::default(),
            sevenz: SevenzSettings::default(),
            rar: RarSettings::default(),
        }
    }
}

impl Default for TarSettings {
    fn default() -> Self {
        Self {
            compressor: default_tar_compressor(),
            args: default_tar_args(),
            extension: default_tar_extension(),
        }
    }
}

impl Default for SevenzSettings {
    fn default() -> Self {
        Self {
            path: None,
            args: default_sevenz_args(),
        }
    }
}

impl Default for RarSettings {
    fn default() -> Self {
        Self {
            path: None,
            args: default_rar_args(),
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enable: false,
            format: default_archive_format(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();

        for target in &self.backups {
            target.validate()?;

            let key = (
                target.destination.path.trim_end_matches('/'),
                target.name.as_str(),
            );
            if !seen.insert(key) {
                return Err(SyncError::Config(format!(
                    "backup name '{}' is used twice for destination {}",
                    target.name, target.destination.path
                )));
            }
        }

        for path in &self.settings.archive_working_paths {
            if !path.is_absolute() {
                return Err(SyncError::Config(format!(
                    "archive working path {} is not absolute",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

impl BackupTarget {
    /// Checks that do not touch the filesystem or external tools.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SyncError::Config("backup name must not be empty".into()));
        }
        if self.name.contains('/') || self.name.contains(':') {
            return Err(SyncError::Config(format!(
                "backup name '{}' must not contain '/' or ':'",
                self.name
            )));
        }
        if self.destination.path.ends_with('/') {
            return Err(SyncError::Config(format!(
                "destination {} must not end with '/'",
                self.destination.path
            )));
        }
        Ok(())
    }
}
