//! Running external programs (zfs, btrfs, tar, 7z, rar, rclone, mount).
//!
//! Every tool is run to completion. A non-zero exit becomes
//! [`SyncError::ToolFailed`] carrying whatever the tool wrote to stderr.

use super::errors::{Result, SyncError};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Output of a successful tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().into_owned()
}

fn describe(command: &Command) -> String {
    let args: Vec<String> = command
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    format!("{} {}", program_name(command), args.join(" "))
}

fn spawn_error(command: &Command, err: io::Error) -> SyncError {
    if err.kind() == io::ErrorKind::NotFound {
        SyncError::Config(format!("could not find {} in $PATH", program_name(command)))
    } else {
        SyncError::Io(err)
    }
}

fn check(command: &Command, output: Output) -> Result<ToolOutput> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Err(SyncError::ToolFailed {
            program: program_name(command),
            status: output.status,
            stderr,
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Run a command with captured stdout/stderr.
pub fn run(command: &mut Command) -> Result<ToolOutput> {
    debug!("Running {}", describe(command));
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(command, e))?;
    check(command, output)
}

/// Run a command that writes its own progress/log output to the terminal.
pub fn stream(command: &mut Command) -> Result<()> {
    debug!("Running {}", describe(command));
    let status = command
        .stdin(Stdio::null())
        .status()
        .map_err(|e| spawn_error(command, e))?;

    if !status.success() {
        return Err(SyncError::ToolFailed {
            program: program_name(command),
            status,
            stderr: String::new(),
        });
    }
    Ok(())
}

/// Locate an executable on `$PATH`, failing with a configuration error.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name)
        .map_err(|_| SyncError::Config(format!("could not find {} in $PATH", name)))
}

/// Use `configured` when set, otherwise the first of `candidates` found on `$PATH`.
pub fn resolve_tool(configured: Option<&Path>, candidates: &[&str]) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(SyncError::Config(format!(
            "configured executable {} does not exist",
            path.display()
        )));
    }

    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| {
            SyncError::Config(format!("could not find {} in $PATH", candidates.join(" or ")))
        })
}
