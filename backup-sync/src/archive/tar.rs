//! tar archives, optionally piped through an external compressor.

use super::ArchiveWriter;
use crate::config::TarSettings;
use crate::utils::process;
use crate::utils::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct TarArchiver {
    tar: PathBuf,
    compressor: Option<String>,
    args: Vec<String>,
    extension: String,
}

impl TarArchiver {
    /// Resolve `tar` and the compressor program on `$PATH`.
    pub fn new(settings: &TarSettings) -> Result<Self> {
        let tar = process::require_tool("tar")?;

        let compressor = settings
            .compressor
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(program) = compressor.as_deref().and_then(|c| c.split_whitespace().next()) {
            process::require_tool(program)?;
        }

        Ok(Self {
            tar,
            compressor,
            args: settings.args.clone(),
            extension: settings.extension.clone(),
        })
    }
}

impl ArchiveWriter for TarArchiver {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn write(&self, source: &Path, archive: &Path, members: &[OsString]) -> Result<()> {
        let mut cmd = Command::new(&self.tar);
        cmd.current_dir(source).args(&self.args);
        if let Some(compressor) = &self.compressor {
            cmd.arg("-I").arg(compressor);
        }
        cmd.arg("-cf").arg(archive).arg("--").args(members);

        process::run(&mut cmd)?;
        Ok(())
    }
}
