//! Scoped acquisition of scratch resources (snapshots, archives).

use super::errors::Result;
use std::path::{Path, PathBuf};
use tracing::error;

/// Acquire a resource, run `body` with its path, then release it.
///
/// Release runs on every exit path. If acquisition fails, whatever was
/// partially created is released before the acquisition error is returned.
/// When `body` fails, its error wins and a release failure is only logged;
/// when `body` succeeds, a release failure is returned.
pub fn guarded<P, A, R, F, T>(
    provider: &mut P,
    what: &str,
    acquire: A,
    release: R,
    body: F,
) -> Result<T>
where
    A: FnOnce(&mut P) -> Result<PathBuf>,
    R: Fn(&mut P) -> Result<()>,
    F: FnOnce(&Path) -> Result<T>,
{
    let path = match acquire(provider) {
        Ok(path) => path,
        Err(err) => {
            error!("An error occurred while creating {}: {}", what, err);
            if let Err(cleanup) = release(provider) {
                error!("CRITICAL: could not clean up partially created {}: {}", what, cleanup);
            }
            return Err(err);
        }
    };

    let outcome = body(&path);

    match (outcome, release(provider)) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            error!("CRITICAL: could not release {} after failure: {}", what, cleanup);
            Err(err)
        }
    }
}
