//! Server lock file
//!
//! An advisory exclusive lock held for the daemon's whole lifetime.
//! Clients probe it to tell a live daemon from a stale socket: as long
//! as the lock cannot be taken, the daemon is up.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process;

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::{Result, ServerError};

/// The held daemon lock; dropping it releases the lock.
pub struct LockFile {
    _lock: Flock<File>,
}

impl LockFile {
    /// Take the exclusive lock, failing fast when another instance
    /// holds it. The daemon pid is recorded in the file for operators.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut lock) => {
                lock.set_len(0)?;
                writeln!(&mut *lock, "{}", process::id())?;
                lock.flush()?;
                debug!(path = %path.display(), "server lock acquired");
                Ok(Self { _lock: lock })
            }
            Err((_, _)) => Err(ServerError::AlreadyRunning(path.display().to_string())),
        }
    }

    /// Whether some process currently holds the lock.
    #[must_use]
    pub fn is_held(path: &Path) -> bool {
        let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
            return false;
        };
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            // We could take it, so nobody holds it; dropping releases.
            Ok(_) => false,
            Err((_, _)) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_excludes_second_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("spoold.lock");

        let lock = LockFile::acquire(&path).unwrap();
        assert!(LockFile::is_held(&path));
        assert!(matches!(
            LockFile::acquire(&path),
            Err(ServerError::AlreadyRunning(_))
        ));

        drop(lock);
        assert!(!LockFile::is_held(&path));
        // Re-acquirable after release.
        let _lock = LockFile::acquire(&path).unwrap();
    }

    #[test]
    fn test_missing_lock_file_reads_as_unheld() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!LockFile::is_held(&tmp.path().join("absent.lock")));
    }
}
