//! Directory traversal for archive preparation.
//!
//! Sizes a source tree before picking scratch space and lists the
//! top-level members handed to the archivers.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Calculate total size of all regular files under `root`.
///
/// Symbolic links are not followed and do not count towards the total.
///
/// # Example
/// ```no_run
/// use backup_sync::fs::walker::calculate_total_size;
/// use std::path::Path;
///
/// let bytes = calculate_total_size(Path::new("/data")).unwrap();
/// println!("{} bytes to archive", bytes);
/// ```
pub fn calculate_total_size(root: &Path) -> io::Result<u64> {
    let mut total_size = 0u64;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total_size += entry.metadata()?.len();
        }
    }

    Ok(total_size)
}

/// Names of the immediate children of `root`, sorted bytewise.
///
/// Archivers run inside `root` and receive these relative names, so the
/// member order does not depend on directory iteration order. Names are
/// kept as raw `OsString`s; they need not be valid UTF-8.
pub fn sorted_children(root: &Path) -> io::Result<Vec<OsString>> {
    let mut names = Vec::new();

    for entry in std::fs::read_dir(root)? {
        names.push(entry?.file_name());
    }

    names.sort();
    Ok(names)
}
