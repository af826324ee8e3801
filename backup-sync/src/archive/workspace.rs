//! Scratch space for archives.

use crate::utils::naming;
use crate::utils::{Result, SyncError};
use nix::sys::statvfs::statvfs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_space(path: &Path) -> io::Result<u64> {
    let stat = statvfs(path).map_err(io::Error::from)?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// First candidate whose free space strictly exceeds `required` bytes.
///
/// Candidates whose free space cannot be determined are skipped.
pub fn select_workspace<F>(candidates: &[PathBuf], required: u64, mut free_space: F) -> Result<PathBuf>
where
    F: FnMut(&Path) -> io::Result<u64>,
{
    for candidate in candidates {
        match free_space(candidate) {
            Ok(free) if free > required => {
                info!("Using {} as working directory for archives", candidate.display());
                return Ok(candidate.clone());
            }
            Ok(free) => {
                info!(
                    "{} has {} bytes free, {} needed",
                    candidate.display(),
                    free,
                    required
                );
            }
            Err(e) => warn!("Skipping working directory {}: {}", candidate.display(), e),
        }
    }

    error!("Could not find a workspace with enough free space");
    Err(SyncError::ResourceExhausted { required })
}

/// Create a fresh, uniquely named scratch directory under `root`.
pub fn create_workdir(root: &Path) -> Result<PathBuf> {
    let base = format!("backup_sync_{}", naming::random_suffix(8));
    let name = naming::unique_name(&base, |candidate| root.join(format!(".{}", candidate)).exists());
    let dir = root.join(format!(".{}", name));
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fake_roots() -> (Vec<PathBuf>, HashMap<PathBuf, u64>) {
        let roots = vec![
            PathBuf::from("/small"),
            PathBuf::from("/medium"),
            PathBuf::from("/large"),
        ];
        let free: HashMap<PathBuf, u64> = roots.iter().cloned().zip([10, 50, 100]).collect();
        (roots, free)
    }

    #[test]
    fn test_picks_first_root_with_enough_space() {
        let (roots, free) = fake_roots();
        let picked = select_workspace(&roots, 60, |p| Ok(free[p])).unwrap();
        assert_eq!(picked, PathBuf::from("/large"));
    }

    #[test]
    fn test_free_space_must_exceed_requirement() {
        let (roots, free) = fake_roots();
        let picked = select_workspace(&roots, 50, |p| Ok(free[p])).unwrap();
        assert_eq!(picked, PathBuf::from("/large"));
    }

    #[test]
    fn test_exhaustion_when_nothing_fits() {
        let (roots, free) = fake_roots();
        let err = select_workspace(&roots, 200, |p| Ok(free[p])).unwrap_err();
        assert!(matches!(err, SyncError::ResourceExhausted { required: 200 }));
    }

    #[test]
    fn test_unreadable_root_is_skipped() {
        let (roots, free) = fake_roots();
        let picked = select_workspace(&roots, 5, |p| {
            if p == Path::new("/small") {
                Err(io::Error::from(io::ErrorKind::NotFound))
            } else {
                Ok(free[p])
            }
        })
        .unwrap();
        assert_eq!(picked, PathBuf::from("/medium"));
    }

    #[test]
    fn test_free_space_of_real_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(free_space(dir.path()).unwrap() > 0);
    }

    #[test]
    fn test_workdirs_are_unique() {
        let root = tempfile::TempDir::new().unwrap();
        let a = create_workdir(root.path()).unwrap();
        let b = create_workdir(root.path()).unwrap();

        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        assert_eq!(a.parent(), Some(root.path()));
    }
}
