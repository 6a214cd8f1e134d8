//! Daemon process identity marker.
//!
//! A single pid file at a well-known path guards against a second daemon
//! instance racing the first on the same queue. The file is removed on
//! clean shutdown; a marker naming a dead process is treated as stale and
//! overwritten so a crashed daemon never blocks the next start.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors from pid marker handling.
#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("Daemon already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An acquired pid marker. Release it on clean shutdown.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write this process's pid to the marker path.
    ///
    /// Fails with [`PidFileError::AlreadyRunning`] if the marker names a
    /// different, still-alive process.
    pub fn acquire(path: PathBuf) -> Result<Self, PidFileError> {
        if let Ok(contents) = std::fs::read_to_string(&path)
            && let Ok(pid) = contents.trim().parse::<u32>()
        {
            if pid != std::process::id() && process_alive(pid) {
                return Err(PidFileError::AlreadyRunning { pid });
            }
            warn!(path = %path.display(), stale_pid = pid, "Replacing stale pid file");
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        debug!(path = %path.display(), pid = std::process::id(), "Pid file written");

        Ok(Self { path })
    }

    /// Marker file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Missing file is fine (e.g. manual cleanup).
    pub fn release(self) -> Result<(), PidFileError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Probe whether a process with the given pid exists (signal 0).
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: kill(2) with signal 0 performs only an existence/permission
    // check; it never affects the target process.
    #[allow(unsafe_code)]
    #[allow(clippy::cast_possible_wrap)]
    let ret = unsafe { libc::kill(pid as i32, 0) };
    // EPERM means the process exists but belongs to someone else.
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");

        let pid_file = PidFile::acquire(path.clone()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        pid_file.release().unwrap();
    }

    #[test]
    fn release_removes_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");

        let pid_file = PidFile::acquire(path.clone()).unwrap();
        pid_file.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn stale_pid_is_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");

        // Near the top of the pid range; almost certainly not a live process.
        std::fs::write(&path, "4194301").unwrap();

        let pid_file = PidFile::acquire(path.clone()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
        pid_file.release().unwrap();
    }

    #[test]
    fn garbage_contents_are_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");
        std::fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::acquire(path.clone()).unwrap();
        pid_file.release().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn live_foreign_pid_blocks_acquisition() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");

        // pid 1 always exists on unix.
        std::fs::write(&path, "1").unwrap();

        let err = PidFile::acquire(path).unwrap_err();
        assert!(matches!(err, PidFileError::AlreadyRunning { pid: 1 }));
    }

    #[test]
    fn release_tolerates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.pid");

        let pid_file = PidFile::acquire(path.clone()).unwrap();
        std::fs::remove_file(&path).unwrap();
        pid_file.release().unwrap();
    }
}
