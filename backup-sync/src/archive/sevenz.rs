//! 7-Zip archives.

use super::ArchiveWriter;
use crate::config::SevenzSettings;
use crate::utils::process;
use crate::utils::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct SevenzArchiver {
    exe: PathBuf,
    args: Vec<String>,
}

impl SevenzArchiver {
    /// Prefers the configured executable, then `7zz`, then `7z`.
    pub fn new(settings: &SevenzSettings) -> Result<Self> {
        let exe = process::resolve_tool(settings.path.as_deref(), &["7zz", "7z"])?;
        Ok(Self {
            exe,
            args: settings.args.clone(),
        })
    }
}

impl ArchiveWriter for SevenzArchiver {
    fn extension(&self) -> &str {
        ".7z"
    }

    fn write(&self, source: &Path, archive: &Path, members: &[OsString]) -> Result<()> {
        process::run(
            Command::new(&self.exe)
                .current_dir(source)
                .args(&self.args)
                .arg("a")
                .arg(archive)
                .arg("--")
                .args(members),
        )?;
        Ok(())
    }
}
