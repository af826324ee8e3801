//! Error types for the backup engine.

use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not implemented: {0}")]
    Unsupported(String),

    #[error("No working directory with more than {required} bytes of free space")]
    ResourceExhausted { required: u64 },

    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote location not found: {0}")]
    RemoteNotFound(String),

    #[error("Invalid backup record: {0}")]
    InvalidRecord(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SyncError {
    /// True for failures that come from an external program exiting non-zero.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, SyncError::ToolFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
