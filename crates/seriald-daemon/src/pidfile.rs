//! Pidfile-based single-instance lock.
//!
//! The pidfile holds the decimal pid of the running daemon. A pidfile is
//! considered busy when it exists, holds a pid, and that pid is alive; a
//! stale pidfile (dead or unreadable pid) does not block a new start.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use seriald_core::{FileAccessError, FileAction};
use tracing::{debug, warn};

/// On-disk lock holding the owning process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidfileLock {
    path: PathBuf,
}

impl PidfileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the pidfile exists.
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Reads the recorded pid.
    ///
    /// Returns `Ok(None)` if the file holds no valid pid.
    pub fn read_pid(&self) -> Result<Option<u32>, FileAccessError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| FileAccessError::classify(&self.path, FileAction::Read, e))?;

        let pid = contents
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<u32>().ok())
            .filter(|pid| *pid > 0);

        if pid.is_none() {
            warn!(pidfile = %self.path.display(), "Pidfile does not contain a valid pid");
        }
        Ok(pid)
    }

    /// The recorded pid, if the pidfile exists and is readable.
    pub fn owner_pid(&self) -> Option<u32> {
        if !self.is_locked() {
            return None;
        }
        match self.read_pid() {
            Ok(pid) => pid,
            Err(e) => {
                warn!(error = %e, "Cannot read pidfile");
                None
            }
        }
    }

    /// Returns the pid of a live owner, if another instance holds the lock.
    pub fn live_owner(&self) -> Option<u32> {
        self.owner_pid().filter(|pid| is_process_alive(*pid))
    }

    /// Records the current process as the owner.
    pub fn acquire(&self) -> Result<u32, FileAccessError> {
        let pid = process::id();
        fs::write(&self.path, pid.to_string())
            .map_err(|e| FileAccessError::classify(&self.path, FileAction::Write, e))?;
        debug!(pidfile = %self.path.display(), pid, "Pidfile written");
        Ok(pid)
    }

    /// Removes the pidfile. A missing file is not an error.
    pub fn release(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Probes `pid` with signal 0.
///
/// A process we are not allowed to signal still exists, so `EPERM`
/// counts as alive.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // SAFETY: kill with signal 0 performs only the existence and
    // permission checks.
    if unsafe { libc::kill(raw, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends `signal` to `pid`.
pub fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid pid {pid}")))?;

    // SAFETY: plain kill(2) on a positive pid; never a process group.
    if unsafe { libc::kill(raw, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Forcibly terminates `pid` with SIGKILL.
pub fn terminate(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGKILL)
}
