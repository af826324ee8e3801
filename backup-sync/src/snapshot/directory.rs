//! Plain directories: the source itself is the snapshot.

use super::SnapshotProvider;
use crate::utils::{Result, SyncError};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    path: PathBuf,
}

impl DirectorySnapshot {
    pub fn new(path: &str) -> Result<Self> {
        let path = PathBuf::from(path);

        if !path.is_absolute() {
            return Err(SyncError::Config(format!(
                "source path is not absolute: {}",
                path.display()
            )));
        }
        if !path.exists() {
            return Err(SyncError::Config(format!(
                "source path does not exist: {}",
                path.display()
            )));
        }

        Ok(Self { path })
    }
}

impl SnapshotProvider for DirectorySnapshot {
    fn acquire(&mut self) -> Result<PathBuf> {
        Ok(self.path.clone())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
