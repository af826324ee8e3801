//! RAR archives. Every new archive is tested before it is accepted.

use super::ArchiveWriter;
use crate::config::RarSettings;
use crate::utils::process;
use crate::utils::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::error;

#[derive(Debug, Clone)]
pub struct RarArchiver {
    exe: PathBuf,
    args: Vec<String>,
}

impl RarArchiver {
    pub fn new(settings: &RarSettings) -> Result<Self> {
        let exe = process::resolve_tool(settings.path.as_deref(), &["rar"])?;
        Ok(Self {
            exe,
            args: switches_only(&settings.args),
        })
    }

    fn verify(&self, archive: &Path) -> Result<()> {
        let tested = process::run(Command::new(&self.exe).args(["-idc", "t"]).arg(archive));
        if let Err(e) = &tested {
            error!("Verification of {} failed: {}", archive.display(), e);
        }
        tested.map(|_| ())
    }
}

/// Drop a stray `a` command from user-supplied switches; it is added explicitly.
fn switches_only(args: &[String]) -> Vec<String> {
    args.iter().filter(|a| a.as_str() != "a").cloned().collect()
}

impl ArchiveWriter for RarArchiver {
    fn extension(&self) -> &str {
        ".rar"
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
        self.verify(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_letter_is_removed_from_switches() {
        let args: Vec<String> = ["-s", "a", "-m5"].iter().map(|s| s.to_string()).collect();
        assert_eq!(switches_only(&args), vec!["-s", "-m5"]);
    }
}
