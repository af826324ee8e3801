//! Filesystem helpers.

pub mod walker;
