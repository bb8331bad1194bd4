//! Run-level lock
//!
//! A second installer started while one is running fails fast instead of
//! racing it for the container engine and system files.

use crate::InstallError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock held for the lifetime of a run
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl RunLock {
    /// Take the lock without blocking
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, InstallError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                return Err(InstallError::AlreadyRunning(path.to_path_buf()));
            }
            Err((_, errno)) => return Err(InstallError::Syscall(errno)),
        };

        debug!("Acquired run lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run/install.lock");

        let first = RunLock::acquire(&path).unwrap();
        assert_eq!(first.path(), path);

        let second = RunLock::acquire(&path);
        assert!(matches!(second, Err(InstallError::AlreadyRunning(_))));

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
