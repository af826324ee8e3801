//! Utility modules for the backup engine.

pub mod errors;
pub mod logger;
pub mod naming;
pub mod process;
pub mod scope;

pub use errors::{Result, SyncError};
