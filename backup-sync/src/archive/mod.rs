//! Single-file archives of a snapshot, built in scratch space.
//!
//! An [`Archiver`] is chosen from the target's archive format and checks its
//! external tools up front. An [`Archive`] binds an archiver to one source
//! directory and owns the scratch directory and archive file it creates.

pub mod rar;
pub mod sevenz;
pub mod tar;
pub mod workspace;

use crate::config::{ArchiveFormat, Settings};
use crate::fs::walker;
use crate::utils::scope::guarded;
use crate::utils::{Result, SyncError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub use rar::RarArchiver;
pub use sevenz::SevenzArchiver;
pub use tar::TarArchiver;

/// One archive format.
pub trait ArchiveWriter {
    /// File extension including the leading dot.
    fn extension(&self) -> &str;

    /// Write `members` (names relative to `source`) into `archive`.
    fn write(&self, source: &Path, archive: &Path, members: &[OsString]) -> Result<()>;
}

/// Archive format selected from configuration.
#[derive(Debug, Clone)]
pub enum Archiver {
    Tar(TarArchiver),
    SevenZ(SevenzArchiver),
    Rar(RarArchiver),
}

impl Archiver {
    /// Fails with a configuration error when the format's tool is missing.
    pub fn new(format: ArchiveFormat, settings: &Settings) -> Result<Self> {
        Ok(match format {
            ArchiveFormat::Tar => Archiver::Tar(TarArchiver::new(&settings.tar)?),
            ArchiveFormat::SevenZ => Archiver::SevenZ(SevenzArchiver::new(&settings.sevenz)?),
            ArchiveFormat::Rar => Archiver::Rar(RarArchiver::new(&settings.rar)?),
        })
    }

    fn writer(&self) -> &dyn ArchiveWriter {
        match self {
            Archiver::Tar(a) => a,
            Archiver::SevenZ(a) => a,
            Archiver::Rar(a) => a,
        }
    }
}

impl ArchiveWriter for Archiver {
    fn extension(&self) -> &str {
        self.writer().extension()
    }

    fn write(&self, source: &Path, archive: &Path, members: &[OsString]) -> Result<()> {
        self.writer().write(source, archive, members)
    }
}

/// Lifecycle shared by archive handles.
pub trait ArchiveProvider {
    /// Build the archive, or return the existing one.
    fn create(&mut self) -> Result<PathBuf>;

    /// Remove the archive and its scratch directory. Safe to repeat.
    fn destroy(&mut self) -> Result<()>;
}

/// Archive of one source directory.
#[derive(Debug)]
pub struct Archive {
    source: PathBuf,
    name: String,
    archiver: Archiver,
    working_paths: Vec<PathBuf>,
    workdir: Option<PathBuf>,
    archive_path: Option<PathBuf>,
}

impl Archive {
    /// `name` is the archive file name without extension.
    pub fn new(source: &Path, name: &str, archiver: Archiver, working_paths: &[PathBuf]) -> Result<Self> {
        if !source.is_absolute() {
            return Err(SyncError::Config(format!(
                "{} is not an absolute path",
                source.display()
            )));
        }
        if !source.is_dir() {
            return Err(SyncError::Config(format!(
                "{} is not a directory",
                source.display()
            )));
        }

        Ok(Self {
            source: source.to_path_buf(),
            name: name.to_string(),
            archiver,
            working_paths: working_paths.to_vec(),
            workdir: None,
            archive_path: None,
        })
    }

    /// File name the archive gets: `{name}{extension}`.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.archiver.extension())
    }

    fn build(&mut self) -> Result<PathBuf> {
        if let Some(path) = self.archive_path.as_ref().filter(|p| p.exists()) {
            return Ok(path.clone());
        }
        // A recorded archive that is gone is rebuilt from scratch.
        self.clean()?;

        match self.write_archive() {
            Ok(path) => {
                self.archive_path = Some(path.clone());
                Ok(path)
            }
            Err(err) => {
                error!("An error occurred while creating archive {}: {}", self.file_name(), err);
                // clean() logs its own failure; the build error is the one reported.
                let _ = self.clean();
                Err(err)
            }
        }
    }

    fn write_archive(&mut self) -> Result<PathBuf> {
        let required = walker::calculate_total_size(&self.source)?;
        let root = workspace::select_workspace(&self.working_paths, required, workspace::free_space)?;
        let workdir = workspace::create_workdir(&root)?;
        self.workdir = Some(workdir.clone());

        let archive_path = workdir.join(self.file_name());
        if archive_path.exists() {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("archive already exists: {}", archive_path.display()),
            )));
        }

        let members = walker::sorted_children(&self.source)?;
        info!("Archiving {} to {}", self.source.display(), archive_path.display());
        self.archiver.write(&self.source, &archive_path, &members)?;

        Ok(archive_path)
    }

    fn clean(&mut self) -> Result<()> {
        let removed = (|| -> std::io::Result<()> {
            if let Some(path) = self.archive_path.as_ref().filter(|p| p.exists()) {
                info!("Deleting archive {}", path.display());
                std::fs::remove_file(path)?;
            }
            if let Some(dir) = self.workdir.as_ref().filter(|d| d.exists()) {
                info!("Deleting temporary directory {}", dir.display());
                std::fs::remove_dir_all(dir)?;
            }
            Ok(())
        })();

        if let Err(e) = removed {
            error!(
                "CRITICAL: could not delete archive {:?} or directory {:?}: {}",
                self.archive_path, self.workdir, e
            );
            return Err(e.into());
        }

        self.archive_path = None;
        self.workdir = None;
        Ok(())
    }
}

impl ArchiveProvider for Archive {
    fn create(&mut self) -> Result<PathBuf> {
        self.build()
    }

    fn destroy(&mut self) -> Result<()> {
        self.clean()
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if self.workdir.is_some() {
            if let Err(e) = self.clean() {
                error!("CRITICAL: archive scratch space left behind: {}", e);
            }
        }
    }
}

/// Create `archive`, run `body` on the archive file, destroy it.
pub fn with_archive<A, F, T>(archive: &mut A, body: F) -> Result<T>
where
    A: ArchiveProvider,
    F: FnOnce(&Path) -> Result<T>,
{
    guarded(archive, "archive", |a| a.create(), |a| a.destroy(), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TarSettings;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn plain_tar() -> Option<Archiver> {
        which::which("tar").ok()?;
        let settings = TarSettings {
            compressor: None,
            args: vec![],
            extension: ".tar".to_string(),
        };
        Some(Archiver::Tar(TarArchiver::new(&settings).ok()?))
    }

    fn populated_source() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
        fs::create_dir(dir.path().join("c")).unwrap();
        fs::write(dir.path().join("c/nested.txt"), b"charlie").unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        dir
    }

    #[test]
    fn test_create_and_destroy() {
        let Some(archiver) = plain_tar() else { return };
        let source = populated_source();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "home_20220723T101500+0900", archiver, &[scratch.path().to_path_buf()])
                .unwrap();
        let path = archive.create().unwrap();

        assert!(path.is_file());
        assert_eq!(path.file_name().unwrap(), "home_20220723T101500+0900.tar");
        let workdir = path.parent().unwrap().to_path_buf();
        assert_eq!(workdir.parent(), Some(scratch.path()));

        archive.destroy().unwrap();
        assert!(!path.exists());
        assert!(!workdir.exists());
        archive.destroy().unwrap();
    }

    #[test]
    fn test_members_are_sorted() {
        let Some(archiver) = plain_tar() else { return };
        let source = populated_source();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "sorted", archiver, &[scratch.path().to_path_buf()]).unwrap();
        let path = archive.create().unwrap();

        let listing = Command::new("tar").arg("-tf").arg(&path).output().unwrap();
        let listing = String::from_utf8_lossy(&listing.stdout);
        let top: Vec<&str> = listing
            .lines()
            .filter(|l| !l.trim_end_matches('/').contains('/'))
            .map(|l| l.trim_end_matches('/'))
            .collect();
        assert_eq!(top, vec!["a.txt", "b.txt", "c"]);
    }

    #[test]
    fn test_second_create_returns_cached_path() {
        let Some(archiver) = plain_tar() else { return };
        let source = populated_source();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "twice", archiver, &[scratch.path().to_path_buf()]).unwrap();
        let first = archive.create().unwrap();
        let modified = fs::metadata(&first).unwrap().modified().unwrap();

        // Re-archiving would have to walk the source again.
        fs::remove_dir_all(source.path().join("c")).unwrap();
        fs::remove_file(source.path().join("a.txt")).unwrap();

        let second = archive.create().unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::metadata(&second).unwrap().modified().unwrap(), modified);
        assert_eq!(
            fs::read_dir(scratch.path()).unwrap().count(),
            1,
            "no second scratch directory"
        );
    }

    #[test]
    fn test_failed_create_cleans_up_via_with_archive() {
        if which::which("tar").is_err() {
            return;
        }
        let settings = TarSettings {
            compressor: None,
            args: vec!["--definitely-not-a-tar-option".to_string()],
            extension: ".tar".to_string(),
        };
        let archiver = Archiver::Tar(TarArchiver::new(&settings).unwrap());
        let source = populated_source();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "x", archiver, &[scratch.path().to_path_buf()]).unwrap();
        let mut ran = false;
        let err = with_archive(&mut archive, |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();

        assert!(err.is_tool_failure());
        assert!(!ran);
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        if which::which("tar").is_err() {
            return;
        }
        let settings = TarSettings {
            compressor: None,
            args: vec!["--definitely-not-a-tar-option".to_string()],
            extension: ".tar".to_string(),
        };
        let archiver = Archiver::Tar(TarArchiver::new(&settings).unwrap());
        let source = populated_source();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "x", archiver, &[scratch.path().to_path_buf()]).unwrap();

        let first = archive.create().unwrap_err();
        assert!(first.is_tool_failure());
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);

        let second = archive.create().unwrap_err();
        assert!(second.is_tool_failure());
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_vanished_archive_is_rebuilt() {
        let Some(archiver) = plain_tar() else { return };
        let source = populated_source();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "again", archiver, &[scratch.path().to_path_buf()]).unwrap();
        let first = archive.create().unwrap();
        fs::remove_file(&first).unwrap();

        let second = archive.create().unwrap();
        assert!(second.is_file());
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 1);
        archive.destroy().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_non_utf8_member_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let Some(archiver) = plain_tar() else { return };
        let source = TempDir::new().unwrap();
        fs::write(source.path().join(OsStr::from_bytes(b"caf\xe9.txt")), b"latin-1").unwrap();
        let scratch = TempDir::new().unwrap();

        let mut archive =
            Archive::new(source.path(), "latin1", archiver, &[scratch.path().to_path_buf()]).unwrap();
        let path = archive.create().unwrap();

        let listing = Command::new("tar").arg("-tf").arg(&path).output().unwrap();
        assert!(listing.status.success());
        assert_eq!(listing.stdout.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count(), 1);
        archive.destroy().unwrap();
    }

    #[test]
    fn test_no_space_anywhere() {
        let Some(archiver) = plain_tar() else { return };
        let source = populated_source();

        let mut archive = Archive::new(source.path(), "x", archiver, &[]).unwrap();
        let err = archive.create().unwrap_err();
        assert!(matches!(err, SyncError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_source_must_be_directory() {
        let Some(archiver) = plain_tar() else { return };
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            Archive::new(file.path(), "x", archiver, &[]),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_missing_tool_fails_before_any_work() {
        let mut settings = Settings::default();
        settings.rar.path = Some(PathBuf::from("/nonexistent/bin/rar"));
        assert!(matches!(
            Archiver::new(ArchiveFormat::Rar, &settings),
            Err(SyncError::Config(_))
        ));
    }
}
